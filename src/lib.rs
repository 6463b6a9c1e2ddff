// SPDX-License-Identifier: MPL-2.0

//! A hierarchical, typed, introspectable key/value registry, modeled on
//! FreeBSD's `sysctl` engine: a kernel or any other long-running process
//! registers nodes into a tree, then reads and writes them through typed
//! handlers that cross a trust boundary via a per-call `Request`.
//!
//! This crate is the registry engine only: the MIB tree (`tree`, `node`),
//! the resolution and dispatch machinery (`resolver`, `dispatch`), the
//! per-call I/O cursor (`request`), the group-scoped dynamic-registration
//! context (`context`), the built-in introspection subtree
//! (`introspect`), a handful of default typed handlers (`handlers`), the
//! global serialization envelope (`envelope`), and bulk startup
//! registration (`bootstrap`). The individual typed handlers a real
//! kernel would expose (integer counters, host name, clock rate, ...),
//! the credentials subsystem, address-space validators, and the
//! legacy-opcode compatibility shim are external collaborators this
//! crate only defines the contracts for.
//!
//! The top-level [`Sysctl`] type ties the tree and the envelope together
//! and exposes the three callable entry points of spec.md §6:
//! [`Sysctl::user_call`], [`Sysctl::kernel_call`], and
//! [`Sysctl::kernel_call_byname`].

mod bootstrap;
mod call;
mod context;
mod dispatch;
mod envelope;
mod error;
mod handlers;
mod introspect;
mod node;
mod request;
mod resolver;
mod tree;

#[cfg(test)]
mod tests;

use std::sync::{Arc, OnceLock};

pub use bootstrap::BootEntry;
pub use call::{CallOutcome, CallStatus};
pub use context::DynContext;
pub use error::{Error, Result};
pub use handlers::{int_handler, long_handler, opaque_handler, string_handler};
pub use node::{
    ChildMap, CtlFlags, CtlType, Handler, HandlerInput, IntBinding, Kind, Node, NodeBody,
    ValueBinding, AUTO, AUTO_LOWER_BOUND,
};
pub use request::{CallerIdentity, FinishResult, LockState, OldOutput, Request, UserSpaceAccess};
pub use tree::Registry;

/// The longest legal numeric path (spec.md §6 "Reserved constants"; the
/// original's `CTL_MAXNAME`).
pub const MAX_PATH_DEPTH: usize = 24;

/// The largest dotted textual name `name2oid` accepts before failing
/// `NAME_TOO_LONG` (spec.md §4.G "3 — name2oid").
pub const MAX_NAME_LEN: usize = 128;

/// Ties the MIB tree to the concurrency envelope and exposes the
/// callable surface of spec.md §6. One `Sysctl` is a complete, independent
/// registry; a process can run more than one (e.g. one per jail), though
/// [`primary_sysctl`] exposes a single process-wide instance the way the
/// original has exactly one kernel-global tree.
pub struct Sysctl {
    registry: Registry,
    envelope: envelope::Envelope,
}

impl Sysctl {
    /// Builds a fresh registry and installs the reserved introspection
    /// subtree under root id 0 (spec.md §4.G).
    pub fn new() -> Sysctl {
        let registry = Registry::new();
        introspect::install(&registry)
            .expect("installing the reserved introspection subtree must not fail");
        Sysctl {
            registry,
            envelope: envelope::Envelope::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Registers a static set of nodes directly under the root (spec.md
    /// §2 "Bootstrap registration", §4.J). Intended to run once at
    /// startup, before the envelope is first acquired (spec.md §5).
    pub fn bootstrap(&self, entries: &[BootEntry]) -> Result<Vec<Arc<Node>>> {
        bootstrap::register_all(&self.registry, entries)
    }

    /// `user-call` (spec.md §6): untrusted caller, buffers in caller
    /// memory validated and transferred through `user_access`.
    pub fn user_call(
        &self,
        caller: Arc<dyn CallerIdentity>,
        user_access: Arc<dyn UserSpaceAccess>,
        path: &[i32],
        old_len: Option<usize>,
        new_input: Vec<u8>,
    ) -> Result<CallOutcome> {
        call::user_call(
            &self.registry,
            &self.envelope,
            caller,
            user_access,
            path,
            old_len,
            new_input,
        )
    }

    /// `kernel-call` (spec.md §6): trusted caller, buffers already in
    /// engine memory.
    pub fn kernel_call(
        &self,
        caller: Arc<dyn CallerIdentity>,
        path: &[i32],
        old_len: Option<usize>,
        new_input: Vec<u8>,
    ) -> Result<CallOutcome> {
        call::kernel_call(
            &self.registry,
            &self.envelope,
            caller,
            path,
            old_len,
            new_input,
        )
    }

    /// `kernel-call-byname` (spec.md §6): resolves `dotted_name` via the
    /// `name2oid` introspection handler, then issues a `kernel_call`
    /// against the resulting numeric path.
    pub fn kernel_call_byname(
        &self,
        caller: Arc<dyn CallerIdentity>,
        dotted_name: &str,
        old_len: Option<usize>,
        new_input: Vec<u8>,
    ) -> Result<CallOutcome> {
        call::kernel_call_byname(
            &self.registry,
            &self.envelope,
            caller,
            dotted_name,
            old_len,
            new_input,
        )
    }
}

impl Default for Sysctl {
    fn default() -> Self {
        Sysctl::new()
    }
}

static SINGLETON: OnceLock<Arc<Sysctl>> = OnceLock::new();

/// Returns the process-wide `Sysctl` instance, creating it on first use.
pub fn primary_sysctl() -> &'static Arc<Sysctl> {
    SINGLETON.get_or_init(|| Arc::new(Sysctl::new()))
}
