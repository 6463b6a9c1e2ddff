// SPDX-License-Identifier: MPL-2.0

//! External interfaces: the callable surface to the syscall shim.
//! `user_call` is the untrusted entry point, `kernel_call` the trusted one,
//! `kernel_call_byname` a convenience composed of two `kernel_call`s. Only
//! the callable boundary is specified here; the shim that marshals actual
//! syscall arguments into these calls is an external collaborator.

use std::sync::Arc;

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::request::{CallerIdentity, Request, UserSpaceAccess};
use crate::request::OldOutput;
use crate::tree::Registry;
use crate::dispatch::root;

/// What the top-level callable reports back across the trust boundary.
/// `NO_MEMORY` is not a hard failure but a truncation hint alongside the
/// (partial) data; any other error is hard, but the bytes already produced
/// before it occurred are still handed back, since the cursor is frozen
/// where it was rather than rolled back.
#[derive(Debug)]
pub enum CallStatus {
    Ok,
    /// The old-output buffer was smaller than the value being read.
    /// `retsize` in `CallOutcome` is the buffer's declared capacity.
    Truncated,
    /// A hard error. `old_bytes` still holds whatever was written to the
    /// old-output buffer before the error occurred.
    Error(Error),
}

#[derive(Debug)]
pub struct CallOutcome {
    pub old_bytes: Vec<u8>,
    pub retsize: usize,
    pub status: CallStatus,
}

/// `pathlen ∈ [2, MAX_PATH_DEPTH]` (spec.md §6) is enforced only at the
/// untrusted `user-call` boundary, matching the original: the `namelen < 2`
/// floor lives solely in `__sysctl` (the syscall entry), not in
/// `kernel_sysctl`/`kernel_sysctlbyname`, which pass `namelen` straight
/// through with no floor. A trusted in-process caller may legitimately
/// address a depth-1 path (a leaf registered directly under root).
fn check_pathlen(pathlen: usize) -> Result<()> {
    if pathlen < 2 || pathlen > crate::MAX_PATH_DEPTH {
        return Err(Error::Invalid);
    }
    Ok(())
}

fn execute(
    registry: &Registry,
    envelope: &Envelope,
    caller: Arc<dyn CallerIdentity>,
    user_access: Option<Arc<dyn UserSpaceAccess>>,
    path: &[i32],
    old_len: Option<usize>,
    new_input: Vec<u8>,
) -> Result<CallOutcome> {
    let mut req = Request::new(caller, user_access, old_len, new_input);
    let dispatch_result = envelope.run(&mut req, |req| root(registry, path, req));
    let finish = req.finish();
    let old_bytes = req.old_bytes().to_vec();
    let retsize = match finish.output {
        OldOutput::None => 0,
        OldOutput::Sized(n) => n,
    };

    let status = match dispatch_result {
        Ok(()) if finish.truncated => CallStatus::Truncated,
        Ok(()) => CallStatus::Ok,
        Err(e) => CallStatus::Error(e),
    };

    Ok(CallOutcome {
        old_bytes,
        retsize,
        status,
    })
}

/// `user-call`: from an untrusted caller. `user_access` does
/// the upfront validation that `old` is writable and `new` is readable
/// for `caller`, then mediates every later cross-trust transfer.
pub fn user_call(
    registry: &Registry,
    envelope: &Envelope,
    caller: Arc<dyn CallerIdentity>,
    user_access: Arc<dyn UserSpaceAccess>,
    path: &[i32],
    old_len: Option<usize>,
    new_input: Vec<u8>,
) -> Result<CallOutcome> {
    check_pathlen(path.len())?;
    user_access.validate(old_len.is_some(), !new_input.is_empty())?;
    execute(
        registry,
        envelope,
        caller,
        Some(user_access),
        path,
        old_len,
        new_input,
    )
}

/// `kernel-call`: from a trusted caller; buffers are already engine memory,
/// so there is no cross-trust pinning to arrange.
pub fn kernel_call(
    registry: &Registry,
    envelope: &Envelope,
    caller: Arc<dyn CallerIdentity>,
    path: &[i32],
    old_len: Option<usize>,
    new_input: Vec<u8>,
) -> Result<CallOutcome> {
    execute(registry, envelope, caller, None, path, old_len, new_input)
}

/// `kernel-call-byname`: composed of two `kernel_call`s — one to
/// `name2oid` (numeric path `[0, 3]`), then the resolved numeric path.
pub fn kernel_call_byname(
    registry: &Registry,
    envelope: &Envelope,
    caller: Arc<dyn CallerIdentity>,
    dotted_name: &str,
    old_len: Option<usize>,
    new_input: Vec<u8>,
) -> Result<CallOutcome> {
    let lookup = kernel_call(
        registry,
        envelope,
        Arc::clone(&caller),
        &[0, 3],
        Some(crate::MAX_PATH_DEPTH * 4),
        dotted_name.as_bytes().to_vec(),
    )?;
    if let CallStatus::Error(e) = lookup.status {
        return Err(e);
    }
    let numeric_path: Vec<i32> = lookup
        .old_bytes
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    kernel_call(registry, envelope, caller, &numeric_path, old_len, new_input)
}
