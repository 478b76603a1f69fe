//! ABBA through recursive mutexes: re-acquiring an already-held recursive
//! lock only bumps its depth and emits no new ordering, but the cross
//! nesting between the two locks is still a deadlock potential.

mod common;

use gatelock::{LockId, ThreadId, fresh_lock_id, fresh_thread_id, global};

fn nest(thread: ThreadId, outer: LockId, inner: LockId) {
    let framework = global();
    framework.notify_recursive_acquire(thread, outer).unwrap();
    // same lock again: depth 2, no edge
    framework.notify_recursive_acquire(thread, outer).unwrap();
    framework.notify_recursive_acquire(thread, inner).unwrap();
    framework.notify_recursive_release(thread, inner).unwrap();
    framework.notify_recursive_release(thread, outer).unwrap();
    framework.notify_recursive_release(thread, outer).unwrap();
}

#[test]
fn recursive_abba_is_reported_once() {
    let scenario = common::begin();

    let (t0, t1) = (fresh_thread_id(), fresh_thread_id());
    let (a, b) = (fresh_lock_id(), fresh_lock_id());

    nest(t0, a, b);
    nest(t1, b, a);

    let diagnostics = scenario.finish();
    common::assert_deadlocks(&diagnostics, &[&[(t0, &[a, b]), (t1, &[b, a])]]);
}
