// SPDX-License-Identifier: MPL-2.0

//! Resolver: walks a numeric path to a node, classifying leaf vs
//! sub-tree-with-handler vs sub-tree-without-handler.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::node::{ChildMap, CtlFlags, Node};
use crate::request::Request;

/// `find-oid(path, pathlen)`. Returns the node the path resolves to and the
/// count of path elements consumed.
///
/// The loop bound is `MAX_PATH_DEPTH` even though `path` is already
/// length-checked by the external boundary; hitting the bound without a
/// match is treated as `NOT_FOUND`.
pub fn find_oid(
    root: &Arc<ChildMap>,
    path: &[i32],
    req: &mut Request,
) -> Result<(Arc<Node>, usize)> {
    let mut owner: Option<Arc<Node>> = None;
    let max_iter = std::cmp::min(path.len(), crate::MAX_PATH_DEPTH);

    for i in 0..max_iter {
        let child = {
            let children: &Arc<ChildMap> = match &owner {
                Some(n) => n.children().expect("descended only into interior nodes"),
                None => root,
            };
            children.read().unwrap().get(&path[i]).cloned()
        };
        let child = match child {
            Some(c) => c,
            None => return Err(Error::NotFound),
        };

        if child.kind.flags.contains(CtlFlags::NO_LOCK) {
            req.pin_enabled = false;
        }

        if child.is_interior() {
            if child.handler.is_some() || i + 1 == path.len() {
                return Ok((child, i + 1));
            }
            owner = Some(child);
        } else if i + 1 == path.len() {
            return Ok((child, i + 1));
        } else {
            return Err(Error::NotDir);
        }
    }

    Err(Error::NotFound)
}
