// SPDX-License-Identifier: MPL-2.0

//! Dynamic context: group-scoped registrations with all-or-nothing
//! rollback on teardown failure.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::node::Node;
use crate::tree::Registry;

/// What actually happened to an entry during `remove_oid`'s real state
/// transition — recorded so `ctx_free`'s commit phase knows whether
/// free-gated cleanup applies, without re-deciding or re-running the
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Unregistered,
    Decremented,
}

/// `remove-oid(node, free?, recurse?)`: removes a dynamic subtree.
pub fn remove_oid(
    registry: &Registry,
    node: &Arc<Node>,
    free: bool,
    recurse: bool,
) -> Result<RemoveOutcome> {
    if !node.is_dynamic() {
        log::warn!("remove_oid: {:?} is not DYNAMIC, refusing to remove", node.name);
        return Err(Error::Perm);
    }

    let rc = node.refcount();
    if rc == 0 {
        log::error!("remove_oid: {:?} has refcount 0 at entry", node.name);
        return Err(Error::Invalid);
    }

    if rc > 1 {
        node.decrement_refcount();
        log::debug!("remove_oid: decremented {:?} ({} -> {})", node.name, rc, rc - 1);
        return Ok(RemoveOutcome::Decremented);
    }

    // rc == 1: either a leaf being fully removed, or an interior node whose
    // last reference is going away.
    if node.is_interior() {
        let children_map = node
            .children()
            .expect("interior node always has a children map");
        let has_children = !children_map.read().unwrap().is_empty();
        if has_children {
            if !recurse {
                return Err(Error::NotEmpty);
            }
            let snapshot: Vec<Arc<Node>> = children_map.read().unwrap().values().cloned().collect();
            for child in &snapshot {
                remove_oid(registry, child, free, true)?;
            }
        }
        if free {
            children_map.write().unwrap().clear();
        }
    }

    registry.unregister(node)?;
    log::debug!("remove_oid: unregistered {:?}", node.name);
    Ok(RemoveOutcome::Unregistered)
}

/// Undoes exactly the state transition `remove_oid` recorded, without
/// re-running its decision logic.
fn undo_remove(registry: &Registry, node: &Arc<Node>, outcome: RemoveOutcome) {
    match outcome {
        RemoveOutcome::Decremented => {
            node.bump_refcount();
        }
        RemoveOutcome::Unregistered => {
            if registry.reinsert(node).is_err() {
                log::error!("ctx_free rollback: failed to reinsert {:?}", node.name);
            }
        }
    }
}

/// An ordered bag of (entry -> node) registrations, newest-last internally;
/// traversed newest-first on teardown.
pub struct DynContext {
    entries: Mutex<Vec<Arc<Node>>>,
}

impl DynContext {
    /// `ctx_init`.
    pub fn new() -> DynContext {
        DynContext {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// `ctx_add`.
    pub fn add(&self, node: Arc<Node>) {
        self.entries.lock().unwrap().push(node);
    }

    /// `ctx_find`.
    pub fn find(&self, node: &Arc<Node>) -> bool {
        self.entries.lock().unwrap().iter().any(|n| Arc::ptr_eq(n, node))
    }

    /// `ctx_del`: removes a single entry without tearing down the rest of
    /// the context.
    pub fn del(&self, node: &Arc<Node>) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if let Some(pos) = entries.iter().position(|n| Arc::ptr_eq(n, node)) {
            entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// `ctx_free`: two-phase teardown.
    ///
    /// Phase 1 performs the real state transition for every entry,
    /// newest-first, recording the outcome. On the first failure, every
    /// already-processed entry is undone in reverse and `BUSY` is returned
    /// — the tree is left exactly as it was. Phase 2 only performs the
    /// `free`-gated storage cleanup for entries phase 1 actually
    /// unregistered; it never repeats the decrement-or-unregister decision,
    /// which would otherwise double-act on a ref-count shared by another
    /// context.
    pub fn ctx_free(&self, registry: &Registry) -> Result<()> {
        let snapshot: Vec<Arc<Node>> = self.entries.lock().unwrap().clone();
        let mut processed: Vec<(Arc<Node>, RemoveOutcome)> = Vec::with_capacity(snapshot.len());

        for node in snapshot.iter().rev() {
            match remove_oid(registry, node, false, false) {
                Ok(outcome) => processed.push((Arc::clone(node), outcome)),
                Err(_) => {
                    log::warn!(
                        "ctx_free: could not remove {:?}, rolling back {} prior removals",
                        node.name,
                        processed.len()
                    );
                    for (undone_node, outcome) in processed.iter().rev() {
                        undo_remove(registry, undone_node, *outcome);
                    }
                    return Err(Error::Busy);
                }
            }
        }

        for (node, outcome) in &processed {
            if *outcome == RemoveOutcome::Unregistered {
                if let Some(children) = node.children() {
                    children.write().unwrap().clear();
                }
            }
        }

        self.entries.lock().unwrap().clear();
        Ok(())
    }
}

impl Default for DynContext {
    fn default() -> Self {
        DynContext::new()
    }
}
