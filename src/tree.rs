// SPDX-License-Identifier: MPL-2.0

//! Tree registry: ordered child lists keyed by numeric id; enforces name
//! uniqueness, assigns auto-ids, ref-counts shared interior nodes.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::node::{ChildMap, Node, AUTO, AUTO_LOWER_BOUND};

/// Process-wide singleton: the ordered child-list of the tree root. The
/// root itself is not a node — it has no name or id of its own, only a
/// child-list, rather than a sentinel node.
pub struct Registry {
    root: Arc<ChildMap>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            root: Arc::new(std::sync::RwLock::new(std::collections::BTreeMap::new())),
        }
    }

    pub fn root(&self) -> &Arc<ChildMap> {
        &self.root
    }

    /// `register(node)`: inserts into `parent`'s children,
    /// preserving sort by numeric id, resolving `AUTO` to
    /// `max(99, max-sibling-id) + 1`. A same-named interior sibling bumps
    /// that sibling's ref-count and wins over the caller's node; a
    /// same-named leaf sibling is a diagnostic failure.
    ///
    /// `build` receives the resolved id so the final `Node` can be
    /// constructed with it in one shot, without a placeholder id.
    pub fn register(
        &self,
        parent: &Arc<ChildMap>,
        name: &str,
        requested_id: i32,
        build: impl FnOnce(i32) -> Node,
    ) -> Result<Arc<Node>> {
        let mut children = parent.write().unwrap();
        if let Some(existing) = children.values().find(|n| n.name == name) {
            return if existing.is_interior() {
                existing.bump_refcount();
                Ok(Arc::clone(existing))
            } else {
                log::warn!("register: refusing to re-use leaf sibling {name:?}");
                Err(Error::Invalid)
            };
        }

        let resolved_id = if requested_id == AUTO {
            let max_sibling = children.keys().next_back().copied().unwrap_or(0);
            std::cmp::max(AUTO_LOWER_BOUND, max_sibling) + 1
        } else {
            requested_id
        };
        if children.contains_key(&resolved_id) {
            log::warn!("register: id {resolved_id} already in use among siblings");
            return Err(Error::Invalid);
        }

        let node = Arc::new(build(resolved_id));
        node.set_parent(Arc::downgrade(parent));
        children.insert(resolved_id, Arc::clone(&node));
        log::debug!("register: inserted {name:?} as id {resolved_id}");
        Ok(node)
    }

    /// `unregister(node)`: unlinks only. Memory reclamation is the caller's
    /// concern (see `context.rs`).
    pub fn unregister(&self, node: &Arc<Node>) -> Result<()> {
        let parent = node.parent().upgrade().ok_or(Error::NotFound)?;
        let mut children = parent.write().unwrap();
        children.remove(&node.id).ok_or(Error::NotFound)?;
        Ok(())
    }

    /// Re-inserts a previously unregistered node back under its recorded
    /// parent at its original id. Used only to undo a dry-run removal
    /// during `ctx_free` rollback (phase 1 failure path).
    pub fn reinsert(&self, node: &Arc<Node>) -> Result<()> {
        let parent = node.parent().upgrade().ok_or(Error::Invalid)?;
        let mut children = parent.write().unwrap();
        children.insert(node.id, Arc::clone(node));
        Ok(())
    }

    /// `add`: registers a dynamic node and, if a context is supplied,
    /// records an entry for later group teardown. Rejecting a `null` parent
    /// is not representable here — `parent` is always a live `Arc`.
    pub fn add_dynamic(
        &self,
        parent: &Arc<ChildMap>,
        name: &str,
        requested_id: i32,
        ctx: Option<&crate::context::DynContext>,
        build: impl FnOnce(i32) -> Node,
    ) -> Result<Arc<Node>> {
        let node = self.register(parent, name, requested_id, build)?;
        if let Some(ctx) = ctx {
            ctx.add(Arc::clone(&node));
        }
        Ok(node)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
