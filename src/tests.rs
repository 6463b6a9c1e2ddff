// SPDX-License-Identifier: MPL-2.0

//! Consolidated test module covering the quantified invariants and the
//! end-to-end scenarios of spec.md §8.

use std::sync::{Arc, RwLock};

use crate::{
    CallStatus, CallerIdentity, CtlFlags, CtlType, DynContext, IntBinding, Node, Request, Sysctl,
    UserSpaceAccess, ValueBinding,
};

struct TestCaller {
    superuser: bool,
    jailed: bool,
    elevated: bool,
}

impl TestCaller {
    fn root() -> Arc<dyn CallerIdentity> {
        Arc::new(TestCaller {
            superuser: true,
            jailed: false,
            elevated: false,
        })
    }

    fn unprivileged() -> Arc<dyn CallerIdentity> {
        Arc::new(TestCaller {
            superuser: false,
            jailed: false,
            elevated: false,
        })
    }
}

impl CallerIdentity for TestCaller {
    fn is_superuser(&self) -> bool {
        self.superuser
    }
    fn is_jailed(&self) -> bool {
        self.jailed
    }
    fn security_level_elevated(&self) -> bool {
        self.elevated
    }
}

/// Trivial in-process `UserSpaceAccess`: no real pages to pin, validation
/// always succeeds. Exercises the pinning transition without needing a
/// real address space.
struct NoopUserAccess;

impl UserSpaceAccess for NoopUserAccess {
    fn pin(&self) -> crate::Result<()> {
        Ok(())
    }
    fn unpin(&self) {}
    fn validate(&self, _want_old: bool, _want_new: bool) -> crate::Result<()> {
        Ok(())
    }
}

fn int_leaf(id: i32, name: &str, cell: Option<i32>, writable: bool) -> Node {
    let mut flags = CtlFlags::READABLE | CtlFlags::ANY_USER;
    if writable {
        flags |= CtlFlags::WRITABLE;
    }
    let binding = IntBinding {
        cell: cell.map(|v| Arc::new(RwLock::new(v))),
        constant: cell.unwrap_or(0),
    };
    Node::new_leaf(
        id,
        name,
        CtlType::Int,
        flags,
        ValueBinding::Int(binding),
        Some(crate::int_handler()),
        "I",
        "",
    )
}

fn string_leaf(id: i32, name: &str, initial: &str, max_len: usize, writable: bool) -> Node {
    let mut flags = CtlFlags::READABLE | CtlFlags::ANY_USER;
    if writable {
        flags |= CtlFlags::WRITABLE;
    }
    Node::new_leaf(
        id,
        name,
        CtlType::String,
        flags,
        ValueBinding::Str(Arc::new(RwLock::new(initial.to_string())), max_len),
        Some(crate::string_handler()),
        "A",
        "",
    )
}

/// A handler that signals `Retry` on its first invocation and succeeds on
/// every later one, for exercising the dispatcher's retry-in-loop discipline.
fn flaky_handler(attempts: Arc<std::sync::atomic::AtomicU32>) -> crate::Handler {
    Arc::new(move |_node, _input, req| {
        if attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            return Err(crate::Error::Retry);
        }
        req.out(&7i32.to_ne_bytes())
    })
}

// --- Scenario 1: auto-id assignment (spec.md §8 scenario 1) ---

#[test]
fn auto_id_assignment_reserves_the_low_bound() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    let root = registry.root();

    registry
        .register(root, "five", 5, |id| {
            Node::new_interior(id, "five", CtlFlags::READABLE, None, "N", "")
        })
        .unwrap();
    registry
        .register(root, "seven", 7, |id| {
            Node::new_interior(id, "seven", CtlFlags::READABLE, None, "N", "")
        })
        .unwrap();

    let x = registry
        .register(root, "x", crate::AUTO, |id| {
            Node::new_interior(id, "x", CtlFlags::READABLE | CtlFlags::DYNAMIC, None, "N", "")
        })
        .unwrap();

    assert_eq!(x.id, 100);
    let ids: Vec<i32> = root.read().unwrap().keys().copied().collect();
    // `_sysctl` occupies id 0; the three siblings registered above sort
    // after it.
    assert_eq!(ids, vec![0, 5, 7, 100]);
}

// --- Scenario 2: shared interior node across two contexts ---

#[test]
fn shared_interior_refcounts_and_tears_down_independently() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    let root = registry.root();

    let ctx_a = DynContext::new();
    let ctx_b = DynContext::new();

    let build = |id: i32| Node::new_interior(id, "shared", CtlFlags::READABLE | CtlFlags::DYNAMIC, None, "N", "");

    let first = registry
        .add_dynamic(root, "shared", crate::AUTO, Some(&ctx_a), build)
        .unwrap();
    assert_eq!(first.refcount(), 1);

    let second = registry
        .add_dynamic(root, "shared", crate::AUTO, Some(&ctx_b), build)
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.refcount(), 2);

    ctx_a.ctx_free(registry).unwrap();
    assert_eq!(first.refcount(), 1);
    assert!(root.read().unwrap().values().any(|n| n.name == "shared"));

    ctx_b.ctx_free(registry).unwrap();
    assert!(!root.read().unwrap().values().any(|n| n.name == "shared"));
}

// --- DynContext::find / DynContext::del ---

#[test]
fn ctx_find_and_del_track_membership_independent_of_teardown() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    let root = registry.root();
    let ctx = DynContext::new();

    let p = registry
        .add_dynamic(root, "p", 80, Some(&ctx), |id| {
            Node::new_interior(id, "p", CtlFlags::READABLE | CtlFlags::DYNAMIC, None, "N", "")
        })
        .unwrap();
    let q = registry
        .add_dynamic(root, "q", 81, Some(&ctx), |id| {
            Node::new_interior(id, "q", CtlFlags::READABLE | CtlFlags::DYNAMIC, None, "N", "")
        })
        .unwrap();

    assert!(ctx.find(&p));
    assert!(ctx.find(&q));

    // Removing `p` from the context before teardown exempts it from
    // ctx_free's bookkeeping entirely: it stays registered afterward.
    assert!(ctx.del(&p));
    assert!(!ctx.find(&p));
    assert!(ctx.find(&q));
    // A second `del` of the same node finds nothing left to remove.
    assert!(!ctx.del(&p));

    ctx.ctx_free(registry).unwrap();
    assert!(root.read().unwrap().contains_key(&p.id));
    assert!(!root.read().unwrap().contains_key(&q.id));
}

// --- Scenario 3: write to a constant-backed integer fails PERM ---

#[test]
fn constant_backed_int_rejects_writes() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    registry
        .register(registry.root(), "answer", 50, |id| {
            let binding = IntBinding {
                cell: None,
                constant: 42,
            };
            Node::new_leaf(
                id,
                "answer",
                CtlType::Int,
                CtlFlags::READABLE | CtlFlags::WRITABLE | CtlFlags::ANY_USER,
                ValueBinding::Int(binding),
                Some(crate::int_handler()),
                "I",
                "",
            )
        })
        .unwrap();

    let read = sysctl
        .kernel_call(TestCaller::root(), &[50], Some(4), Vec::new())
        .unwrap();
    assert!(matches!(read.status, CallStatus::Ok));
    assert_eq!(i32::from_ne_bytes(read.old_bytes[..4].try_into().unwrap()), 42);

    let write = sysctl
        .kernel_call(TestCaller::root(), &[50], None, 7i32.to_ne_bytes().to_vec())
        .unwrap();
    assert!(matches!(write.status, CallStatus::Error(crate::Error::Perm)));
}

// --- Scenario 4: dotted resolution tolerates a trailing dot ---

#[test]
fn name2oid_tolerates_trailing_dot() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    let root = registry.root();
    let kern = registry
        .register(root, "kern", 1, |id| {
            Node::new_interior(id, "kern", CtlFlags::READABLE | CtlFlags::ANY_USER, None, "N", "")
        })
        .unwrap();
    registry
        .register(
            kern.children().unwrap(),
            "hostname",
            1,
            |id| string_leaf(id, "hostname", "host", 64, true),
        )
        .unwrap();

    let with_dot = sysctl
        .kernel_call_byname(TestCaller::root(), "kern.hostname.", Some(64), Vec::new())
        .unwrap();
    let without_dot = sysctl
        .kernel_call_byname(TestCaller::root(), "kern.hostname", Some(64), Vec::new())
        .unwrap();

    assert!(matches!(with_dot.status, CallStatus::Ok));
    assert_eq!(with_dot.old_bytes, without_dot.old_bytes);
}

// --- Scenario 5: truncated read reports NO_MEMORY as a hint ---

#[test]
fn truncated_read_reports_required_size() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    registry
        .register(registry.root(), "greeting", 60, |id| {
            string_leaf(id, "greeting", "twenty-byte-value!!", 64, true)
        })
        .unwrap();

    let outcome = sysctl
        .kernel_call(TestCaller::root(), &[60], Some(7), Vec::new())
        .unwrap();

    assert!(matches!(outcome.status, CallStatus::Truncated));
    assert_eq!(outcome.retsize, 7);
    assert_eq!(outcome.old_bytes.len(), 7);
    assert_eq!(&outcome.old_bytes, b"twenty-");
}

// --- Scenario 6: failed group teardown leaves the tree unchanged ---

#[test]
fn failed_teardown_restores_all_prior_removals() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    let root = registry.root();
    let ctx = DynContext::new();

    let x = registry
        .add_dynamic(root, "x", 70, Some(&ctx), |id| {
            Node::new_interior(id, "x", CtlFlags::READABLE | CtlFlags::DYNAMIC, None, "N", "")
        })
        .unwrap();
    // `y` is registered as a plain (non-dynamic) leaf and mistakenly added
    // to the context anyway, modeling spec.md §8 scenario 6's "re-registered
    // by error".
    let y = registry
        .register(root, "y", 71, |id| int_leaf(id, "y", Some(1), false))
        .unwrap();
    ctx.add(Arc::clone(&y));
    let z = registry
        .add_dynamic(root, "z", 72, Some(&ctx), |id| {
            Node::new_interior(id, "z", CtlFlags::READABLE | CtlFlags::DYNAMIC, None, "N", "")
        })
        .unwrap();

    let before: Vec<i32> = root.read().unwrap().keys().copied().collect();

    let result = ctx.ctx_free(registry);
    assert!(matches!(result, Err(crate::Error::Busy)));

    let after: Vec<i32> = root.read().unwrap().keys().copied().collect();
    assert_eq!(before, after);
    assert!(root.read().unwrap().contains_key(&x.id));
    assert!(root.read().unwrap().contains_key(&y.id));
    assert!(root.read().unwrap().contains_key(&z.id));
}

// --- `next` DFS enumeration ---

#[test]
fn next_enumerates_every_leaf_in_dfs_order_exactly_once() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    let root = registry.root();
    let a = registry
        .register(root, "a", 10, |id| {
            Node::new_interior(id, "a", CtlFlags::READABLE | CtlFlags::ANY_USER, None, "N", "")
        })
        .unwrap();
    registry
        .register(a.children().unwrap(), "a0", 0, |id| int_leaf(id, "a0", Some(1), false))
        .unwrap();
    registry
        .register(a.children().unwrap(), "a1", 1, |id| int_leaf(id, "a1", Some(2), false))
        .unwrap();
    registry
        .register(root, "b", 11, |id| int_leaf(id, "b", Some(3), false))
        .unwrap();

    // The numeric-path argument to `next` travels as the unconsumed
    // dispatch-path suffix after `[0, 2]` (spec.md §4.F.6 "handler
    // receives (node, path+consumed, ...)"), not through new-input.
    let mut collected = Vec::new();
    let mut path: Vec<i32> = Vec::new();
    loop {
        let mut full_path = vec![0, 2];
        full_path.extend_from_slice(&path);
        let outcome = sysctl
            .kernel_call(TestCaller::root(), &full_path, Some(256), Vec::new())
            .unwrap();
        match outcome.status {
            CallStatus::Ok => {
                path = outcome
                    .old_bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                collected.push(path.clone());
            }
            CallStatus::Error(crate::Error::NotFound) => break,
            other => panic!("unexpected next() outcome: {other:?}"),
        }
    }

    // The reserved introspection subtree (root id 0) sorts first and is
    // enumerated before user-registered entries; its five operations are
    // all interior-with-handler nodes, so DFS yields each as a
    // terminal without descending into it.
    assert_eq!(
        collected,
        vec![
            vec![0, 0],
            vec![0, 1],
            vec![0, 2],
            vec![0, 3],
            vec![0, 4],
            vec![10, 0],
            vec![10, 1],
            vec![11],
        ]
    );
}

#[test]
fn next_skips_an_empty_interior_sibling_instead_of_aborting() {
    // Root children: `_sysctl` (id 0, non-empty), `shared` (id 50, an empty
    // dynamic interior node with no handler — spec.md §8 scenario 2's own
    // shape), `other` (id 60, a leaf). The successor of `_sysctl`'s last
    // entry `[0, 4]` must be `[60]`, not `NOT_FOUND`: the empty `shared`
    // node must not poison the walk.
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    let root = registry.root();
    registry
        .register(root, "shared", 50, |id| {
            Node::new_interior(id, "shared", CtlFlags::READABLE | CtlFlags::DYNAMIC, None, "N", "")
        })
        .unwrap();
    registry
        .register(root, "other", 60, |id| int_leaf(id, "other", Some(7), false))
        .unwrap();

    let outcome = sysctl
        .kernel_call(TestCaller::root(), &[0, 2, 0, 4], Some(256), Vec::new())
        .unwrap();
    assert!(matches!(outcome.status, CallStatus::Ok));
    let next_path: Vec<i32> = outcome
        .old_bytes
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(next_path, vec![60]);
}

// --- `kernel_call` accepts a depth-1 path (spec.md §6: the `pathlen`
// floor is a `user-call`-only restriction, not shared with `kernel_call`) ---

#[test]
fn kernel_call_reaches_a_depth_one_leaf() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    registry
        .register(registry.root(), "b", 11, |id| int_leaf(id, "b", Some(3), false))
        .unwrap();

    let outcome = sysctl
        .kernel_call(TestCaller::root(), &[11], Some(4), Vec::new())
        .unwrap();
    assert!(matches!(outcome.status, CallStatus::Ok));
    assert_eq!(i32::from_ne_bytes(outcome.old_bytes[..4].try_into().unwrap()), 3);
}

#[test]
fn user_call_still_rejects_a_depth_one_path() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    registry
        .register(registry.root(), "b", 11, |id| int_leaf(id, "b", Some(3), false))
        .unwrap();

    let outcome = sysctl
        .user_call(TestCaller::root(), Arc::new(NoopUserAccess), &[11], Some(4), Vec::new())
        .unwrap();
    assert!(matches!(outcome.status, CallStatus::Error(crate::Error::Invalid)));
}

// --- `debug` cursor reveals the required size regardless of `old_len` ---

#[test]
fn debug_cursor_matches_required_size_independent_of_buffer() {
    // The internal old-cursor (spec.md §4.D, §8 "For any debug invocation,
    // the old-cursor at return equals the number of bytes that would be
    // needed, independent of old_len") is distinct from the
    // capacity-truncated report `finish` exposes to the caller. Exercise
    // `Request::out` directly with two different capacities and check the
    // raw cursor, rather than the already-truncated `CallOutcome::retsize`.
    let caller = TestCaller::root();
    let dump = b"0 _sysctl\n  0 debug\n  1 name\n";

    let mut small = Request::new(Arc::clone(&caller), None, Some(1), Vec::new());
    small.out(dump).unwrap();
    let mut large = Request::new(caller, None, Some(1 << 20), Vec::new());
    large.out(dump).unwrap();

    assert_eq!(small.old_cursor(), dump.len());
    assert_eq!(large.old_cursor(), dump.len());
    assert_eq!(small.finish().output, crate::OldOutput::Sized(1));
    assert_eq!(large.finish().output, crate::OldOutput::Sized(dump.len()));
}

#[test]
fn debug_requires_superuser() {
    let sysctl = Sysctl::new();
    let outcome = sysctl
        .kernel_call(TestCaller::unprivileged(), &[0, 0], Some(64), Vec::new())
        .unwrap();
    assert!(matches!(outcome.status, CallStatus::Error(crate::Error::Perm)));
}

// --- Concurrency envelope: NO_LOCK opt-out and RETRY discipline ---

#[test]
fn no_lock_node_disables_user_pin_without_releasing_envelope() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    let root = registry.root();
    registry
        .register(root, "nolock", 85, |id| {
            let binding = IntBinding {
                cell: Some(Arc::new(RwLock::new(5))),
                constant: 0,
            };
            Node::new_leaf(
                id,
                "nolock",
                CtlType::Int,
                CtlFlags::READABLE | CtlFlags::ANY_USER | CtlFlags::NO_LOCK,
                ValueBinding::Int(binding),
                Some(crate::int_handler()),
                "I",
                "",
            )
        })
        .unwrap();

    let mut req = Request::new(TestCaller::root(), Some(Arc::new(NoopUserAccess)), Some(4), Vec::new());
    assert!(req.pin_enabled);
    crate::resolver::find_oid(root, &[85], &mut req).unwrap();
    assert!(!req.pin_enabled);
}

#[test]
fn dispatcher_retries_in_loop_on_retry_signal_without_surfacing_it() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let handler_attempts = Arc::clone(&attempts);
    registry
        .register(registry.root(), "flaky", 86, move |id| {
            Node::new_leaf(
                id,
                "flaky",
                CtlType::Int,
                CtlFlags::READABLE | CtlFlags::ANY_USER,
                ValueBinding::None,
                Some(flaky_handler(Arc::clone(&handler_attempts))),
                "I",
                "",
            )
        })
        .unwrap();

    let outcome = sysctl
        .kernel_call(TestCaller::root(), &[86], Some(4), Vec::new())
        .unwrap();

    assert!(matches!(outcome.status, CallStatus::Ok));
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(i32::from_ne_bytes(outcome.old_bytes[..4].try_into().unwrap()), 7);
}

// --- Structural invariants ---

#[test]
fn siblings_are_unique_and_sorted_by_id() {
    let sysctl = Sysctl::new();
    let registry = sysctl.registry();
    let root = registry.root();
    registry
        .register(root, "z", 90, |id| int_leaf(id, "z", Some(0), false))
        .unwrap();
    registry
        .register(root, "a", 5, |id| int_leaf(id, "a", Some(0), false))
        .unwrap();

    let ids: Vec<i32> = root.read().unwrap().keys().copied().collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    let duplicate_name = registry.register(root, "a", 200, |id| int_leaf(id, "a", Some(0), false));
    assert!(duplicate_name.is_err());
}

#[test]
fn leaf_refcount_is_always_one() {
    let leaf = int_leaf(1, "leaf", Some(0), false);
    assert_eq!(leaf.refcount(), 1);
}
