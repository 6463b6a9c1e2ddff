// SPDX-License-Identifier: MPL-2.0

//! Default handlers: generic read/write shapes for integer, long, string,
//! opaque.
//!
//! All four share one shape: if an old-output buffer is present, emit the
//! current value; if new-input is present and the node carries a mutable
//! backing, read the new value into it.

use crate::error::{Error, Result};
use crate::node::{Handler, HandlerInput, ValueBinding};

pub fn int_handler() -> Handler {
    std::sync::Arc::new(|_node, input, req| {
        let binding = match input {
            HandlerInput::Leaf(ValueBinding::Int(b)) => b,
            _ => return Err(Error::Invalid),
        };

        if req.has_old_buffer() {
            let value = match &binding.cell {
                Some(cell) => *cell.read().unwrap(),
                None => binding.constant,
            };
            req.out(&value.to_ne_bytes())?;
        }

        if req.has_new_input() {
            match &binding.cell {
                Some(cell) => {
                    let mut buf = [0u8; 4];
                    req.in_(&mut buf)?;
                    *cell.write().unwrap() = i32::from_ne_bytes(buf);
                }
                // Writing to a constant-backed node fails PERM.
                None => return Err(Error::Perm),
            }
        }
        Ok(())
    })
}

pub fn long_handler() -> Handler {
    std::sync::Arc::new(|_node, input, req| {
        let cell = match input {
            HandlerInput::Leaf(ValueBinding::Long(Some(c))) => c,
            // `arg1 == null` is INVALID for `long`; there is no constant
            // fallback the way there is for `int`.
            _ => return Err(Error::Invalid),
        };

        if req.has_old_buffer() {
            let value = *cell.read().unwrap();
            req.out(&value.to_ne_bytes())?;
        }

        if req.has_new_input() {
            let mut buf = [0u8; 8];
            req.in_(&mut buf)?;
            *cell.write().unwrap() = i64::from_ne_bytes(buf);
        }
        Ok(())
    })
}

pub fn string_handler() -> Handler {
    std::sync::Arc::new(|_node, input, req| {
        let (buf, max_len) = match input {
            HandlerInput::Leaf(ValueBinding::Str(b, m)) => (b, m),
            _ => return Err(Error::Invalid),
        };

        if req.has_old_buffer() {
            let mut bytes = buf.read().unwrap().clone().into_bytes();
            bytes.push(0);
            req.out(&bytes)?;
        }

        if req.has_new_input() {
            let incoming_len = req.new_input_remaining().len();
            // Fail when payload-plus-terminator would exceed the backing
            // buffer, i.e. when incoming_len + 1 > max_len.
            if incoming_len + 1 > max_len {
                return Err(Error::Invalid);
            }
            let mut tmp = vec![0u8; incoming_len];
            req.in_(&mut tmp)?;
            let s = String::from_utf8(tmp).map_err(|_| Error::Invalid)?;
            *buf.write().unwrap() = s;
        }
        Ok(())
    })
}

pub fn opaque_handler() -> Handler {
    std::sync::Arc::new(|_node, input, req| {
        let (buf, len) = match input {
            HandlerInput::Leaf(ValueBinding::Opaque(b, l)) => (b, l),
            _ => return Err(Error::Invalid),
        };

        if req.has_old_buffer() {
            let snapshot = buf.read().unwrap().clone();
            req.out(&snapshot)?;
        }

        if req.has_new_input() {
            let mut tmp = vec![0u8; len];
            req.in_(&mut tmp)?;
            *buf.write().unwrap() = tmp;
        }
        Ok(())
    })
}
