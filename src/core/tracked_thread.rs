//! A thread wrapper that reports start and join to the framework.
//!
//! Spawning handshakes with the child over a channel: the child first
//! reports its identifier and then waits until the parent has emitted the
//! start event, so both segment hops are on disk before the child's first
//! lock event. Without the handshake the child could race its own stream.

use crate::core::framework;
use crate::core::types::{ThreadId, current_thread_id};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Drop-in thread handle whose lifecycle is observed by the detector.
pub struct TrackedThread<T> {
    handle: JoinHandle<T>,
    child: ThreadId,
}

impl<T> TrackedThread<T>
where
    T: Send + 'static,
{
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let parent = current_thread_id();
        let (id_tx, id_rx) = mpsc::channel::<ThreadId>();
        let (go_tx, go_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            id_tx
                .send(current_thread_id())
                .expect("parent waits for the child id");
            go_rx.recv().expect("parent signals after the start event");
            f()
        });

        let child = id_rx.recv().expect("child sends its id first");
        if let Err(e) = framework::global().notify_start(parent, child) {
            log::warn!("failed to record start of thread {child}: {e}");
        }
        go_tx.send(()).expect("child waits for the go signal");

        TrackedThread { handle, child }
    }

    /// The observed identifier of the wrapped thread.
    pub fn id(&self) -> ThreadId {
        self.child
    }

    /// Wait for the thread and report the join once it has finished.
    pub fn join(self) -> thread::Result<T> {
        let parent = current_thread_id();
        let result = self.handle.join();
        if let Err(e) = framework::global().notify_join(parent, self.child) {
            log::warn!("failed to record join of thread {}: {e}", self.child);
        }
        result
    }
}
