// SPDX-License-Identifier: MPL-2.0

//! Node: the in-memory record for one tree vertex.
//!
//! A node is a tagged union rather than a pair of inheritance-related types:
//! `NodeBody::Interior` carries a child list, `NodeBody::Leaf` carries a
//! value-binding. The handler is an independent closure, not a virtual
//! method — an interior node may still carry one, in which case the
//! resolver stops at it and treats it as an opaque subtree.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, Weak};

use bitflags::bitflags;

use crate::error::Result;
use crate::request::Request;

/// Sentinel id requesting an engine-assigned identifier.
pub const AUTO: i32 = -1;

/// Reserved lower bound for auto-assigned ids; ids below this are reserved
/// for well-known, statically registered entries.
pub const AUTO_LOWER_BOUND: i32 = 99;

/// The type tag half of a node's `Kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CtlType {
    Node = 1,
    Int = 2,
    String = 3,
    Quad = 4,
    Opaque = 5,
}

bitflags! {
    /// The access-flags half of a node's `Kind`. Laid out above
    /// the low bits reserved for `CtlType` so the two halves never collide
    /// in the wire representation `oidfmt` exposes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CtlFlags: u32 {
        const READABLE = 1 << 4;
        const WRITABLE = 1 << 5;
        const ANY_USER = 1 << 6;
        const SECURE   = 1 << 7;
        const PRISON   = 1 << 8;
        const NO_LOCK  = 1 << 9;
        const DYNAMIC  = 1 << 10;
    }
}

/// Bit-packed descriptor carrying a node's type tag and access flags. Stable
/// wire layout: low bits hold the type tag, high bits hold flags — consumed
/// by external introspection decoders, so the encoding must not shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kind {
    pub type_: CtlType,
    pub flags: CtlFlags,
}

impl Kind {
    pub fn new(type_: CtlType, flags: CtlFlags) -> Self {
        Kind { type_, flags }
    }

    /// The stable wire encoding consumed by the `oidfmt` introspection
    /// handler.
    pub fn to_wire(self) -> u32 {
        self.type_ as u32 | self.flags.bits()
    }
}

/// A mutable `int`-typed value binding, modeling `(arg1, arg2)` for
/// `CtlType::Int`: `arg1` is the backing cell, or, if absent, `arg2` is a
/// read-only constant.
#[derive(Clone)]
pub struct IntBinding {
    pub cell: Option<Arc<RwLock<i32>>>,
    pub constant: i32,
}

/// The value-binding half of a leaf node: a safely-typed replacement for an
/// untyped `(arg1, arg2)` pointer pair, one variant per handler shape.
/// `None` is for leaves whose handler closure owns its state directly and
/// needs no engine-interpreted binding.
#[derive(Clone)]
pub enum ValueBinding {
    Int(IntBinding),
    /// `arg1 == null` is `INVALID` for `long`; there is no constant-backed
    /// variant the way there is for `int`.
    Long(Option<Arc<RwLock<i64>>>),
    /// Backing buffer plus `arg2`, the maximum length.
    Str(Arc<RwLock<String>>, usize),
    /// Backing buffer plus `arg2`, the exact length.
    Opaque(Arc<RwLock<Vec<u8>>>, usize),
    None,
}

/// What a handler receives beyond `(node, request)`: either the unconsumed
/// path suffix (interior node acting as an opaque subtree) or the leaf's
/// value-binding.
pub enum HandlerInput<'a> {
    Subtree(&'a [i32]),
    Leaf(ValueBinding),
}

/// A handler adapts a node's semantics to a `Request`. Modeled as a trait
/// object rather than a bare function pointer so introspection and
/// bootstrap handlers can close over captured state.
pub type Handler =
    Arc<dyn Fn(&Arc<Node>, HandlerInput, &mut Request) -> Result<()> + Send + Sync>;

/// Children keyed by numeric id, kept sorted ascending by construction
/// (`BTreeMap` iterates in key order). Wrapped in
/// its own `Arc` so a child's parent back-reference (a `Weak` into this
/// map, not into the parent `Node`) has something independently owned to
/// point at.
pub type ChildMap = RwLock<BTreeMap<i32, Arc<Node>>>;

pub enum NodeBody {
    Interior { children: Arc<ChildMap> },
    Leaf { binding: ValueBinding },
}

impl NodeBody {
    pub fn is_interior(&self) -> bool {
        matches!(self, NodeBody::Interior { .. })
    }
}

pub struct Node {
    pub id: i32,
    pub name: String,
    pub kind: Kind,
    pub body: NodeBody,
    pub handler: Option<Handler>,
    pub fmt: String,
    pub descr: String,
    refcount: AtomicU32,
    /// Back-reference to the containing child-list, not to the parent node
    /// itself — this is what keeps the tree a pure DAG with no cycles.
    parent: RwLock<Weak<ChildMap>>,
}

impl Node {
    pub fn new_interior(
        id: i32,
        name: impl Into<String>,
        flags: CtlFlags,
        handler: Option<Handler>,
        fmt: impl Into<String>,
        descr: impl Into<String>,
    ) -> Node {
        Node {
            id,
            name: name.into(),
            kind: Kind::new(CtlType::Node, flags),
            body: NodeBody::Interior {
                children: Arc::new(RwLock::new(BTreeMap::new())),
            },
            handler,
            fmt: fmt.into(),
            descr: descr.into(),
            refcount: AtomicU32::new(1),
            parent: RwLock::new(Weak::new()),
        }
    }

    pub fn new_leaf(
        id: i32,
        name: impl Into<String>,
        type_: CtlType,
        flags: CtlFlags,
        binding: ValueBinding,
        handler: Option<Handler>,
        fmt: impl Into<String>,
        descr: impl Into<String>,
    ) -> Node {
        Node {
            id,
            name: name.into(),
            kind: Kind::new(type_, flags),
            body: NodeBody::Leaf { binding },
            handler,
            fmt: fmt.into(),
            descr: descr.into(),
            refcount: AtomicU32::new(1),
            parent: RwLock::new(Weak::new()),
        }
    }

    pub fn is_interior(&self) -> bool {
        self.body.is_interior()
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_interior()
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind.flags.contains(CtlFlags::DYNAMIC)
    }

    pub fn children(&self) -> Option<&Arc<ChildMap>> {
        match &self.body {
            NodeBody::Interior { children } => Some(children),
            NodeBody::Leaf { .. } => None,
        }
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::SeqCst)
    }

    pub fn bump_refcount(&self) -> u32 {
        self.refcount.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the refcount after decrementing. Saturates at 0 rather than
    /// wrapping; a decrement from 0 is a diagnostic condition handled by
    /// the caller, not here.
    pub fn decrement_refcount(&self) -> u32 {
        loop {
            let cur = self.refcount.load(Ordering::SeqCst);
            if cur == 0 {
                return 0;
            }
            if self
                .refcount
                .compare_exchange(cur, cur - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return cur - 1;
            }
        }
    }

    pub fn set_parent(&self, parent: Weak<ChildMap>) {
        *self.parent.write().unwrap() = parent;
    }

    pub fn parent(&self) -> Weak<ChildMap> {
        self.parent.read().unwrap().clone()
    }
}
