// SPDX-License-Identifier: MPL-2.0

//! Introspection handlers: built-in tree-walking operations exposed under
//! the reserved root-id 0.
//!
//! Each handler closes over a clone of the registry's root child-list —
//! the one piece of global state these operations need beyond the node
//! they're invoked on — rather than reaching for a hidden singleton.

use std::ops::Bound;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::node::{ChildMap, CtlFlags, CtlType, Handler, HandlerInput, Node, ValueBinding};
use crate::tree::Registry;

/// Installs the reserved `_sysctl` subtree (root id 0) and its five fixed
/// children: debug (0), name (1), next (2), name2oid (3), oidfmt (4).
pub fn install(registry: &Registry) -> Result<Arc<Node>> {
    let root = Arc::clone(registry.root());

    let sysctl_node = registry.register(registry.root(), "_sysctl", 0, |id| {
        Node::new_interior(
            id,
            "_sysctl",
            CtlFlags::READABLE | CtlFlags::ANY_USER,
            None,
            "N",
            "reserved introspection subtree",
        )
    })?;
    let children = Arc::clone(
        sysctl_node
            .children()
            .expect("_sysctl is always constructed as an interior node"),
    );

    registry.register(&children, "debug", 0, |id| {
        Node::new_interior(
            id,
            "debug",
            CtlFlags::READABLE,
            Some(debug_handler(Arc::clone(&root))),
            "A",
            "dump the entire tree as indented text",
        )
    })?;
    registry.register(&children, "name", 1, |id| {
        Node::new_interior(
            id,
            "name",
            CtlFlags::READABLE | CtlFlags::ANY_USER,
            Some(name_handler(Arc::clone(&root))),
            "A",
            "numeric path to dotted name",
        )
    })?;
    registry.register(&children, "next", 2, |id| {
        Node::new_interior(
            id,
            "next",
            CtlFlags::READABLE | CtlFlags::ANY_USER,
            Some(next_handler(Arc::clone(&root))),
            "I",
            "DFS successor of a numeric path",
        )
    })?;
    registry.register(&children, "name2oid", 3, |id| {
        Node::new_leaf(
            id,
            "name2oid",
            CtlType::Opaque,
            CtlFlags::READABLE | CtlFlags::WRITABLE | CtlFlags::ANY_USER,
            ValueBinding::None,
            Some(name2oid_handler(Arc::clone(&root))),
            "I",
            "dotted name to numeric path",
        )
    })?;
    registry.register(&children, "oidfmt", 4, |id| {
        Node::new_interior(
            id,
            "oidfmt",
            CtlFlags::READABLE | CtlFlags::ANY_USER,
            Some(oidfmt_handler(Arc::clone(&root))),
            "I",
            "kind descriptor and format string",
        )
    })?;

    Ok(sysctl_node)
}

fn dump_subtree(children: &Arc<ChildMap>, depth: usize, out: &mut String) {
    for (id, node) in children.read().unwrap().iter() {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{id} {}\n", node.name));
        if let Some(sub) = node.children() {
            dump_subtree(sub, depth + 1, out);
        }
    }
}

/// `0 — debug`: dumps the entire tree; always returns `NOT_FOUND` as a
/// sentinel after dumping, regardless of success.
fn debug_handler(root: Arc<ChildMap>) -> Handler {
    Arc::new(move |_node, _input, req| {
        if !req.caller.is_superuser() {
            return Err(Error::Perm);
        }
        let mut out = String::new();
        dump_subtree(&root, 0, &mut out);
        req.out(out.as_bytes())?;
        Err(Error::NotFound)
    })
}

/// `1 — name`: numeric path to dotted name. Path elements outside the tree
/// degrade to their decimal representation.
fn name_handler(root: Arc<ChildMap>) -> Handler {
    Arc::new(move |_node, input, req| {
        let path = match input {
            HandlerInput::Subtree(p) => p,
            _ => return Err(Error::Invalid),
        };

        let mut parts = Vec::with_capacity(path.len());
        let mut current = Some(Arc::clone(&root));
        for &id in path {
            let found = current
                .as_ref()
                .and_then(|c| c.read().unwrap().get(&id).cloned());
            match found {
                Some(n) => {
                    parts.push(n.name.clone());
                    current = n.children().cloned();
                }
                None => {
                    parts.push(id.to_string());
                    current = None;
                }
            }
        }

        let mut joined = parts.join(".");
        joined.push('\0');
        req.out(joined.as_bytes())
    })
}

/// Leftmost DFS path to a leaf or handler-terminated node starting fresh
/// from `children`. An interior node without a handler and with no
/// successor of its own (e.g. an empty dynamic subtree) is skipped in
/// favor of the next sibling by id, rather than aborting the search.
fn first_descendant(children: &Arc<ChildMap>) -> Option<Vec<i32>> {
    let snapshot: Vec<(i32, Arc<Node>)> = {
        let map = children.read().unwrap();
        map.iter().map(|(id, node)| (*id, Arc::clone(node))).collect()
    };
    for (id, node) in snapshot {
        if node.is_leaf() || node.handler.is_some() {
            return Some(vec![id]);
        }
        let sub = node
            .children()
            .expect("interior-no-handler node always has a children map");
        if let Some(mut rest) = first_descendant(sub) {
            let mut result = vec![id];
            result.append(&mut rest);
            return Some(result);
        }
    }
    None
}

/// DFS successor of `path` within `children`: try to find a successor
/// inside the exact child matching `path[0]`'s subtree; if there is none
/// (terminal node, handler-node, or subtree exhausted), the successor is
/// the first descendant of the next sibling by id — equivalent to
/// recursing into that sibling with an empty prefix.
fn next_in(children: &Arc<ChildMap>, path: &[i32]) -> Option<Vec<i32>> {
    if path.is_empty() {
        return first_descendant(children);
    }
    let (&first, rest) = path.split_first().unwrap();

    let exact: Option<Arc<Node>> = children.read().unwrap().get(&first).cloned();
    if let Some(node) = exact {
        if node.is_interior() && node.handler.is_none() {
            let sub = node
                .children()
                .expect("interior-no-handler node always has a children map");
            if let Some(mut deeper) = next_in(sub, rest) {
                let mut result = vec![first];
                result.append(&mut deeper);
                return Some(result);
            }
        }
    }

    // Scan forward through later siblings by id until one yields a
    // successor; an interior sibling without a handler and without a
    // successor of its own (e.g. an empty dynamic subtree) is skipped
    // rather than aborting the whole search.
    let later: Vec<(i32, Arc<Node>)> = {
        let map = children.read().unwrap();
        map.range((Bound::Excluded(first), Bound::Unbounded))
            .map(|(k, v)| (*k, Arc::clone(v)))
            .collect()
    };

    for (id, node) in later {
        if node.is_leaf() || node.handler.is_some() {
            return Some(vec![id]);
        }
        let sub = node
            .children()
            .expect("interior-no-handler node always has a children map");
        if let Some(mut deeper) = first_descendant(sub) {
            let mut result = vec![id];
            result.append(&mut deeper);
            return Some(result);
        }
    }
    None
}

/// `2 — next`: DFS successor of a numeric path.
fn next_handler(root: Arc<ChildMap>) -> Handler {
    Arc::new(move |_node, input, req| {
        let path = match input {
            HandlerInput::Subtree(p) => p,
            _ => return Err(Error::Invalid),
        };
        match next_in(&root, path) {
            Some(result) => {
                let mut bytes = Vec::with_capacity(result.len() * 4);
                for id in result {
                    bytes.extend_from_slice(&id.to_ne_bytes());
                }
                req.out(&bytes)
            }
            None => Err(Error::NotFound),
        }
    })
}

/// `3 — name2oid`: dotted textual path in the new-input buffer to numeric
/// path in the old-output buffer. Trailing `.` is tolerated.
fn name2oid_handler(root: Arc<ChildMap>) -> Handler {
    Arc::new(move |_node, _input, req| {
        let raw_len = req.new_input_remaining().len();
        if raw_len >= crate::MAX_NAME_LEN {
            return Err(Error::NameTooLong);
        }
        let mut raw = vec![0u8; raw_len];
        req.in_(&mut raw)?;

        let text = std::str::from_utf8(&raw).map_err(|_| Error::Invalid)?;
        // Strip exactly one trailing '.', matching name2oid()'s single-character
        // strip; a second trailing dot survives and produces an empty segment
        // that fails to resolve below.
        let trimmed = text.strip_suffix('.').unwrap_or(text);
        if trimmed.is_empty() {
            return Err(Error::NotFound);
        }

        let mut numeric = Vec::new();
        let mut current = Arc::clone(&root);
        let segments: Vec<&str> = trimmed.split('.').collect();
        for (idx, seg) in segments.iter().enumerate() {
            let found = current
                .read()
                .unwrap()
                .values()
                .find(|n| n.name == *seg)
                .cloned();
            let node = found.ok_or(Error::NotFound)?;
            numeric.push(node.id);
            if idx + 1 < segments.len() {
                current = Arc::clone(node.children().ok_or(Error::NotFound)?);
            }
        }

        let mut bytes = Vec::with_capacity(numeric.len() * 4);
        for id in numeric {
            bytes.extend_from_slice(&id.to_ne_bytes());
        }
        req.out(&bytes)
    })
}

/// `4 — oidfmt`: kind descriptor followed by the node's format string,
/// `\0`-terminated.
fn oidfmt_handler(root: Arc<ChildMap>) -> Handler {
    Arc::new(move |_node, input, req| {
        let path = match input {
            HandlerInput::Subtree(p) => p,
            _ => return Err(Error::Invalid),
        };
        if path.is_empty() {
            return Err(Error::NotFound);
        }

        let mut current = Arc::clone(&root);
        let mut target: Option<Arc<Node>> = None;
        for (idx, &id) in path.iter().enumerate() {
            let found = current.read().unwrap().get(&id).cloned().ok_or(Error::NotFound)?;
            if idx + 1 == path.len() {
                target = Some(found);
            } else {
                current = Arc::clone(found.children().ok_or(Error::NotFound)?);
            }
        }
        let node = target.ok_or(Error::NotFound)?;

        let mut bytes = node.kind.to_wire().to_ne_bytes().to_vec();
        bytes.extend_from_slice(node.fmt.as_bytes());
        bytes.push(0);
        req.out(&bytes)
    })
}
