// SPDX-License-Identifier: MPL-2.0

//! Bootstrap registration: bulk registration of a static set of nodes at
//! startup (spec.md §2 "Bootstrap registration", §4.J).
//!
//! Mirrors the original's linker-set bulk registration
//! (`sysctl_register_set`, driven by `SYSINIT(sysctl, SI_SUB_KMEM, ...)`):
//! a flat list of entries registered directly under the root, in order,
//! before the envelope is first acquired (spec.md §5 "Registrations at
//! startup complete before the envelope is first acquired"). The
//! `SYSINIT` ordering machinery itself belongs to the host process, not
//! this engine, so it has no counterpart here.

use std::sync::Arc;

use crate::error::Result;
use crate::node::Node;
use crate::tree::Registry;

/// One static top-level registration to perform at startup.
pub struct BootEntry {
    pub name: &'static str,
    pub id: i32,
    pub build: fn(i32) -> Node,
}

impl BootEntry {
    pub const fn new(name: &'static str, id: i32, build: fn(i32) -> Node) -> BootEntry {
        BootEntry { name, id, build }
    }
}

/// Registers every entry in `entries` directly under `registry`'s root. A
/// failure partway through leaves the already-registered entries in
/// place — bootstrap sets are static and non-overlapping by construction,
/// so a failure here is a programming error, not a condition the engine
/// needs to roll back.
pub fn register_all(registry: &Registry, entries: &[BootEntry]) -> Result<Vec<Arc<Node>>> {
    let root = Arc::clone(registry.root());
    entries
        .iter()
        .map(|entry| {
            let node = registry.register(&root, entry.name, entry.id, entry.build)?;
            log::debug!("bootstrap: registered {:?} as id {}", entry.name, entry.id);
            Ok(node)
        })
        .collect()
}
