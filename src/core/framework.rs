//! Process-wide capture facade.
//!
//! A `Framework` ties the notify entry points to the identifier service,
//! the segment table and the filesystem dispatcher. Every notify call is
//! a no-op while capture is disabled, so instrumented programs pay almost
//! nothing when not under observation.
//!
//! The segment mutex is held only across the minting done at start/join;
//! acquire and release notifications go straight to the owning thread's
//! sink. A lazily initialized process-wide instance backs the C API and
//! the tracked wrappers.

use crate::core::error::EventError;
use crate::core::event::{
    AcquireEvent, CallStack, Event, JoinEvent, ReleaseEvent, SegmentHopEvent, StartEvent,
};
use crate::core::sink::FilesystemDispatcher;
use crate::core::types::{Segment, ThreadId, LockId};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

struct SegmentTable {
    next: Segment,
    of_thread: FxHashMap<ThreadId, Segment>,
}

impl SegmentTable {
    fn new() -> Self {
        SegmentTable {
            // segment 0 belongs to the main thread from process birth
            next: Segment(1),
            of_thread: FxHashMap::default(),
        }
    }

    fn mint(&mut self) -> Segment {
        let fresh = self.next;
        self.next = self.next.succ();
        fresh
    }

    fn of(&self, thread: ThreadId) -> Segment {
        self.of_thread
            .get(&thread)
            .copied()
            .unwrap_or_default()
    }

    fn set(&mut self, thread: ThreadId, segment: Segment) {
        self.of_thread.insert(thread, segment);
    }
}

/// Capture facade: on/off switch, segment bookkeeping, event dispatch.
pub struct Framework {
    enabled: AtomicBool,
    dispatcher: FilesystemDispatcher,
    segments: Mutex<SegmentTable>,
}

impl Default for Framework {
    fn default() -> Self {
        Self::new()
    }
}

impl Framework {
    pub fn new() -> Self {
        Framework {
            enabled: AtomicBool::new(false),
            dispatcher: FilesystemDispatcher::new(),
            segments: Mutex::new(SegmentTable::new()),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Attach the repository directory all subsequent events are written
    /// to. A `{timestamp}` placeholder in the path is expanded, so several
    /// observed runs can share one configuration.
    pub fn set_repository(&self, path: impl AsRef<Path>) -> Result<(), EventError> {
        let path = path.as_ref();
        let expanded = match path.to_str() {
            Some(s) if s.contains("{timestamp}") => {
                let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
                PathBuf::from(s.replace("{timestamp}", &stamp))
            }
            _ => path.to_path_buf(),
        };
        self.dispatcher.set_root(&expanded)
    }

    /// Detach from the repository, closing every sink.
    pub fn unset_repository(&self) {
        self.dispatcher.unset_root();
    }

    pub fn repository(&self) -> Option<PathBuf> {
        self.dispatcher.root()
    }

    pub fn notify_acquire(&self, thread: ThreadId, lock: LockId) -> Result<(), EventError> {
        self.notify_acquire_traced(thread, lock, CallStack::new())
    }

    /// Acquire with a pre-captured acquisition site. Capture itself is
    /// platform work done by the caller; the core only forwards frames.
    pub fn notify_acquire_traced(
        &self,
        thread: ThreadId,
        lock: LockId,
        stack: CallStack,
    ) -> Result<(), EventError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.dispatcher
            .dispatch(&Event::Acquire(AcquireEvent::with_stack(thread, lock, stack)))
    }

    pub fn notify_recursive_acquire(
        &self,
        thread: ThreadId,
        lock: LockId,
    ) -> Result<(), EventError> {
        self.notify_recursive_acquire_traced(thread, lock, CallStack::new())
    }

    pub fn notify_recursive_acquire_traced(
        &self,
        thread: ThreadId,
        lock: LockId,
        stack: CallStack,
    ) -> Result<(), EventError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.dispatcher.dispatch(&Event::RecursiveAcquire(AcquireEvent::with_stack(
            thread, lock, stack,
        )))
    }

    pub fn notify_release(&self, thread: ThreadId, lock: LockId) -> Result<(), EventError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.dispatcher
            .dispatch(&Event::Release(ReleaseEvent { thread, lock }))
    }

    pub fn notify_recursive_release(
        &self,
        thread: ThreadId,
        lock: LockId,
    ) -> Result<(), EventError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.dispatcher
            .dispatch(&Event::RecursiveRelease(ReleaseEvent { thread, lock }))
    }

    /// Record that `parent` spawned `child`: the parent moves to a fresh
    /// segment, the child gets its first one, and both transitions are
    /// announced in the thread streams for the lock-graph builder.
    pub fn notify_start(&self, parent: ThreadId, child: ThreadId) -> Result<(), EventError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let (before, parent_after, child_first) = {
            let mut table = self.segments.lock();
            let before = table.of(parent);
            let parent_after = table.mint();
            let child_first = table.mint();
            table.set(parent, parent_after);
            table.set(child, child_first);
            (before, parent_after, child_first)
        };

        self.dispatcher.dispatch(&Event::Start(StartEvent {
            parent,
            before,
            after: parent_after,
            child: child_first,
        }))?;
        self.dispatcher.dispatch(&Event::SegmentHop(SegmentHopEvent {
            thread: parent,
            segment: parent_after,
        }))?;
        self.dispatcher.dispatch(&Event::SegmentHop(SegmentHopEvent {
            thread: child,
            segment: child_first,
        }))
    }

    /// Record that `parent` joined `child`: the child's final segment now
    /// happens before everything the parent does next.
    pub fn notify_join(&self, parent: ThreadId, child: ThreadId) -> Result<(), EventError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let (before, parent_after, child_final) = {
            let mut table = self.segments.lock();
            let before = table.of(parent);
            let parent_after = table.mint();
            let child_final = table.of(child);
            table.set(parent, parent_after);
            (before, parent_after, child_final)
        };

        self.dispatcher.dispatch(&Event::Join(JoinEvent {
            parent,
            before,
            after: parent_after,
            child_final,
        }))?;
        self.dispatcher.dispatch(&Event::SegmentHop(SegmentHopEvent {
            thread: parent,
            segment: parent_after,
        }))
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL: Framework = Framework::new();
}

/// The process-wide framework behind the C API and the tracked wrappers.
pub fn global() -> &'static Framework {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analysis::analyze;
    use crate::core::graph::lock_graph::LockGraphBuilder;
    use crate::core::graph::segmentation::SegmentationGraphBuilder;
    use crate::core::loader::RepositoryLoader;
    use tempfile::TempDir;

    #[test]
    fn disabled_framework_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        let framework = Framework::new();
        framework.set_repository(&root).unwrap();

        framework.notify_acquire(ThreadId(1), LockId(1)).unwrap();
        framework.notify_start(ThreadId(0), ThreadId(1)).unwrap();
        framework.unset_repository();

        assert!(!root.join("1").exists());
        assert_eq!(
            std::fs::read_to_string(root.join("process_wide")).unwrap(),
            ""
        );
    }

    #[test]
    fn start_mints_segments_and_announces_hops() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        let framework = Framework::new();
        framework.enable();
        framework.set_repository(&root).unwrap();

        framework.notify_start(ThreadId(0), ThreadId(1)).unwrap();
        framework.unset_repository();

        assert_eq!(
            std::fs::read_to_string(root.join("process_wide")).unwrap(),
            "0~0~1~2~\n"
        );
        assert_eq!(std::fs::read_to_string(root.join("0")).unwrap(), "0>1>\n");
        assert_eq!(std::fs::read_to_string(root.join("1")).unwrap(), "1>2>\n");
    }

    #[test]
    fn join_uses_the_childs_final_segment() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        let framework = Framework::new();
        framework.enable();
        framework.set_repository(&root).unwrap();

        framework.notify_start(ThreadId(0), ThreadId(1)).unwrap();
        framework.notify_join(ThreadId(0), ThreadId(1)).unwrap();
        framework.unset_repository();

        assert_eq!(
            std::fs::read_to_string(root.join("process_wide")).unwrap(),
            "0~0~1~2~\n0^1^3^2^\n"
        );
    }

    #[test]
    fn timestamp_placeholder_is_expanded() {
        let tmp = TempDir::new().unwrap();
        let framework = Framework::new();
        framework
            .set_repository(tmp.path().join("run_{timestamp}"))
            .unwrap();

        let root = framework.repository().unwrap();
        assert!(!root.to_string_lossy().contains("{timestamp}"));
        assert!(root.is_dir());
        framework.unset_repository();
    }

    /// End-to-end through one framework instance: capture an ABBA run,
    /// reload it, and find the deadlock potential.
    #[test]
    fn captured_abba_run_analyzes_to_one_deadlock() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        let framework = Framework::new();
        framework.enable();
        framework.set_repository(&root).unwrap();

        let (main, t0, t1) = (ThreadId(0), ThreadId(1), ThreadId(2));
        let (a, b) = (LockId(10), LockId(20));

        framework.notify_start(main, t0).unwrap();
        framework.notify_start(main, t1).unwrap();

        framework.notify_acquire(t0, a).unwrap();
        framework.notify_acquire(t0, b).unwrap();
        framework.notify_release(t0, b).unwrap();
        framework.notify_release(t0, a).unwrap();

        framework.notify_acquire(t1, b).unwrap();
        framework.notify_acquire(t1, a).unwrap();
        framework.notify_release(t1, a).unwrap();
        framework.notify_release(t1, b).unwrap();

        framework.notify_join(main, t0).unwrap();
        framework.notify_join(main, t1).unwrap();
        framework.unset_repository();

        let loader = RepositoryLoader::open(&root).unwrap();

        let mut segmentation = SegmentationGraphBuilder::new(true);
        for event in loader.process_events().unwrap() {
            segmentation.feed(&event.unwrap());
        }

        let mut lock_graph = LockGraphBuilder::new(true);
        for thread in loader.thread_ids().unwrap() {
            for event in loader.thread_events(thread).unwrap() {
                lock_graph.feed(&event.unwrap());
            }
        }

        let diagnostics = analyze(&lock_graph.finish(), &segmentation.finish());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].streaks.len(), 2);
    }
}
