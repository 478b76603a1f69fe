//! The locks a deadlocked thread holds must be listed in the order it
//! acquired them. The middle locks are deliberately taken in descending
//! id order, so an implementation that sorts its held set by identifier
//! cannot pass by accident.

mod common;

use gatelock::{TrackedMutex, TrackedThread};
use std::sync::Arc;
use std::sync::mpsc;

#[test]
fn streaks_follow_acquisition_order() {
    let scenario = common::begin();

    let a = Arc::new(TrackedMutex::new(()));
    let b = Arc::new(TrackedMutex::new(()));
    // created aa..ad, locked ad..aa
    let aa = Arc::new(TrackedMutex::new(()));
    let ab = Arc::new(TrackedMutex::new(()));
    let ac = Arc::new(TrackedMutex::new(()));
    let ad = Arc::new(TrackedMutex::new(()));
    let (first_done_tx, first_done_rx) = mpsc::channel::<()>();

    let (a0, b0) = (Arc::clone(&a), Arc::clone(&b));
    let (aa0, ab0, ac0, ad0) = (
        Arc::clone(&aa),
        Arc::clone(&ab),
        Arc::clone(&ac),
        Arc::clone(&ad),
    );
    let t0 = TrackedThread::spawn(move || {
        {
            let _a = a0.lock();
            let _ad = ad0.lock();
            let _ac = ac0.lock();
            let _ab = ab0.lock();
            let _aa = aa0.lock();
            let _b = b0.lock();
        }
        first_done_tx.send(()).unwrap();
    });

    let (a1, b1) = (Arc::clone(&a), Arc::clone(&b));
    let t1 = TrackedThread::spawn(move || {
        first_done_rx.recv().unwrap();
        let _b = b1.lock();
        let _a = a1.lock();
    });

    let (tid0, tid1) = (t0.id(), t1.id());
    t0.join().unwrap();
    t1.join().unwrap();

    let diagnostics = scenario.finish();
    common::assert_deadlocks(
        &diagnostics,
        &[&[
            (
                tid0,
                &[a.id(), ad.id(), ac.id(), ab.id(), aa.id(), b.id()],
            ),
            (tid1, &[b.id(), a.id()]),
        ]],
    );
}
