//! A thin mutex wrapper that reports its acquisitions to the framework.
//!
//! The wrapper adds nothing to the analysis itself; it only makes sure
//! that every lock and unlock of the wrapped `parking_lot::Mutex` turns
//! into an acquire/release event attributed to the calling thread.

use crate::core::framework;
use crate::core::types::{LockId, ThreadId, current_thread_id, fresh_lock_id};
use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};

/// Drop-in mutex whose lock operations are observed by the detector.
pub struct TrackedMutex<T> {
    id: LockId,
    inner: Mutex<T>,
}

/// Guard for a [`TrackedMutex`]; reports the release when dropped.
pub struct TrackedGuard<'a, T> {
    thread: ThreadId,
    lock: LockId,
    guard: MutexGuard<'a, T>,
}

impl<T> TrackedMutex<T> {
    pub fn new(value: T) -> Self {
        TrackedMutex {
            id: fresh_lock_id(),
            inner: Mutex::new(value),
        }
    }

    /// The identifier this mutex reports itself under.
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Acquire the lock, reporting the acquisition once it is granted.
    pub fn lock(&self) -> TrackedGuard<'_, T> {
        let thread = current_thread_id();
        let guard = self.inner.lock();
        if let Err(e) = framework::global().notify_acquire(thread, self.id) {
            log::warn!("failed to record acquire of lock {}: {e}", self.id);
        }
        TrackedGuard {
            thread,
            lock: self.id,
            guard,
        }
    }

    /// Acquire without blocking; `None` if the lock is already held.
    pub fn try_lock(&self) -> Option<TrackedGuard<'_, T>> {
        let thread = current_thread_id();
        let guard = self.inner.try_lock()?;
        if let Err(e) = framework::global().notify_acquire(thread, self.id) {
            log::warn!("failed to record acquire of lock {}: {e}", self.id);
        }
        Some(TrackedGuard {
            thread,
            lock: self.id,
            guard,
        })
    }
}

impl<T> Deref for TrackedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.guard.deref()
    }
}

impl<T> DerefMut for TrackedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.deref_mut()
    }
}

impl<T> Drop for TrackedGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = framework::global().notify_release(self.thread, self.lock) {
            log::warn!("failed to record release of lock {}: {e}", self.lock);
        }
    }
}
