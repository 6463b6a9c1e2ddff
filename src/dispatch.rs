// SPDX-License-Identifier: MPL-2.0

//! Dispatcher: permission checks, retries, and invocation of the target
//! handler.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::node::{CtlFlags, HandlerInput, Node, NodeBody};
use crate::request::{CallerIdentity, Request};
use crate::resolver::find_oid;
use crate::tree::Registry;

/// Privilege policy for writes to nodes that lack `ANY_USER`: the caller
/// must be a superuser, and if jailed, the node must additionally carry
/// `PRISON`.
fn check_privilege(caller: &dyn CallerIdentity, flags: CtlFlags) -> Result<()> {
    if flags.contains(CtlFlags::ANY_USER) {
        return Ok(());
    }
    if !caller.is_superuser() {
        return Err(Error::Perm);
    }
    if caller.is_jailed() && !flags.contains(CtlFlags::PRISON) {
        return Err(Error::Perm);
    }
    Ok(())
}

/// `root(path, pathlen, req)`. Retries the whole resolve/invoke sequence
/// while the handler returns `RETRY`, without releasing the envelope
/// between attempts.
pub fn root(registry: &Registry, path: &[i32], req: &mut Request) -> Result<()> {
    loop {
        match dispatch_once(registry, path, req) {
            Err(Error::Retry) => continue,
            other => return other,
        }
    }
}

fn dispatch_once(registry: &Registry, path: &[i32], req: &mut Request) -> Result<()> {
    let (node, consumed) = find_oid(registry.root(), path, req)?;

    if node.is_interior() && node.handler.is_none() {
        return Err(Error::IsDir);
    }

    if req.has_new_input() {
        if !node.kind.flags.contains(CtlFlags::WRITABLE) {
            return Err(Error::Perm);
        }
        if node.kind.flags.contains(CtlFlags::SECURE) && req.caller.security_level_elevated() {
            return Err(Error::Perm);
        }
        check_privilege(req.caller.as_ref(), node.kind.flags)?;
    }

    let handler = match &node.handler {
        Some(h) => Arc::clone(h),
        None => return Err(Error::Invalid),
    };

    let input = build_input(&node, &path[consumed..]);
    handler(&node, input, req)
}

fn build_input<'a>(node: &Node, remaining: &'a [i32]) -> HandlerInput<'a> {
    if node.is_interior() {
        HandlerInput::Subtree(remaining)
    } else {
        match &node.body {
            NodeBody::Leaf { binding } => HandlerInput::Leaf(binding.clone()),
            NodeBody::Interior { .. } => unreachable!("leaf branch only reached for leaf nodes"),
        }
    }
}
