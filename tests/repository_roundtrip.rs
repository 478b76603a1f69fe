//! Whatever a framework writes, the loader reads back: same events, same
//! per-thread order, stacks included.

use gatelock::{
    AcquireEvent, Event, Framework, JoinEvent, LockId, ReleaseEvent, RepositoryLoader,
    SegmentHopEvent, StackFrame, StartEvent, Segment, ThreadId,
};
use tempfile::TempDir;

#[test]
fn captured_events_reload_in_order() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("repo");

    let framework = Framework::new();
    framework.enable();
    framework.set_repository(&root).unwrap();

    let (main, worker) = (ThreadId(0), ThreadId(1));
    let (a, b) = (LockId(10), LockId(20));
    let site = vec![
        StackFrame::new(0x5510, "load_manifest", "indexer"),
        StackFrame::new(0x1000, "main", "indexer"),
    ];

    framework.notify_start(main, worker).unwrap();
    framework
        .notify_acquire_traced(worker, a, site.clone())
        .unwrap();
    framework.notify_acquire(worker, b).unwrap();
    framework.notify_release(worker, b).unwrap();
    framework.notify_release(worker, a).unwrap();
    framework.notify_join(main, worker).unwrap();
    framework.unset_repository();

    let loader = RepositoryLoader::open(&root).unwrap();
    assert_eq!(loader.thread_ids().unwrap(), vec![main, worker]);

    let worker_events: Vec<Event> = loader
        .thread_events(worker)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        worker_events,
        vec![
            Event::SegmentHop(SegmentHopEvent {
                thread: worker,
                segment: Segment(2),
            }),
            Event::Acquire(AcquireEvent::with_stack(worker, a, site)),
            Event::Acquire(AcquireEvent::new(worker, b)),
            Event::Release(ReleaseEvent {
                thread: worker,
                lock: b,
            }),
            Event::Release(ReleaseEvent {
                thread: worker,
                lock: a,
            }),
        ]
    );

    let process_events: Vec<Event> = loader
        .process_events()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        process_events,
        vec![
            Event::Start(StartEvent {
                parent: main,
                before: Segment(0),
                after: Segment(1),
                child: Segment(2),
            }),
            Event::Join(JoinEvent {
                parent: main,
                before: Segment(1),
                after: Segment(3),
                child_final: Segment(2),
            }),
        ]
    );
}
