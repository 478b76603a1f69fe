//! C-callable notify surface.
//!
//! A flat `d2_*` API over the process-wide framework so instrumented
//! programs in any language can feed the detector. Every function takes
//! and returns only scalar integers and NUL-terminated strings, keeping
//! the surface stable across language boundaries.
//!
//! Capture is best-effort: notify calls that fail to write are logged on
//! the Rust side and otherwise swallowed, since a diagnostics layer must
//! never take the observed program down with it.

use crate::core::framework;
use crate::core::types::{LockId, ThreadId};
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

/// Switch event capture on.
#[unsafe(no_mangle)]
pub extern "C" fn d2_enable_event_logging() {
    framework::global().enable();
}

/// Switch event capture off. Notify calls become no-ops.
#[unsafe(no_mangle)]
pub extern "C" fn d2_disable_event_logging() {
    framework::global().disable();
}

/// Whether event capture is currently on.
///
/// # Returns
/// * `1` if enabled
/// * `0` if disabled
#[unsafe(no_mangle)]
pub extern "C" fn d2_is_enabled() -> c_int {
    if framework::global().is_enabled() { 1 } else { 0 }
}

/// Whether event capture is currently off.
#[unsafe(no_mangle)]
pub extern "C" fn d2_is_disabled() -> c_int {
    if framework::global().is_enabled() { 0 } else { 1 }
}

/// Attach the repository directory events are written to.
///
/// # Arguments
/// * `path` - Repository directory as a NUL-terminated string. Created if
///   missing; must otherwise be an empty directory.
///
/// # Returns
/// * `0` on success
/// * `1` if `path` is NULL or not valid UTF-8
/// * `2` if the repository could not be created or opened
///
/// # Safety
/// `path` must be NULL or point to a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn d2_set_log_repository(path: *const c_char) -> c_int {
    if path.is_null() {
        return 1;
    }
    let path = match unsafe { CStr::from_ptr(path) }.to_str() {
        Ok(s) => s,
        Err(_) => return 1,
    };
    match framework::global().set_repository(path) {
        Ok(()) => 0,
        Err(e) => {
            log::warn!("d2_set_log_repository failed: {e}");
            2
        }
    }
}

/// Detach from the repository and close every sink.
#[unsafe(no_mangle)]
pub extern "C" fn d2_unset_log_repository() {
    framework::global().unset_repository();
}

fn best_effort(what: &str, result: Result<(), crate::core::error::EventError>) {
    if let Err(e) = result {
        log::warn!("{what} failed: {e}");
    }
}

/// Record that `thread_id` acquired `lock_id` (non-recursively).
#[unsafe(no_mangle)]
pub extern "C" fn d2_notify_acquire(thread_id: usize, lock_id: usize) {
    best_effort(
        "d2_notify_acquire",
        framework::global().notify_acquire(ThreadId(thread_id), LockId(lock_id)),
    );
}

/// Record that `thread_id` acquired the recursive lock `lock_id`.
#[unsafe(no_mangle)]
pub extern "C" fn d2_notify_recursive_acquire(thread_id: usize, lock_id: usize) {
    best_effort(
        "d2_notify_recursive_acquire",
        framework::global().notify_recursive_acquire(ThreadId(thread_id), LockId(lock_id)),
    );
}

/// Record that `thread_id` released `lock_id` (non-recursively).
#[unsafe(no_mangle)]
pub extern "C" fn d2_notify_release(thread_id: usize, lock_id: usize) {
    best_effort(
        "d2_notify_release",
        framework::global().notify_release(ThreadId(thread_id), LockId(lock_id)),
    );
}

/// Record that `thread_id` released the recursive lock `lock_id`.
#[unsafe(no_mangle)]
pub extern "C" fn d2_notify_recursive_release(thread_id: usize, lock_id: usize) {
    best_effort(
        "d2_notify_recursive_release",
        framework::global().notify_recursive_release(ThreadId(thread_id), LockId(lock_id)),
    );
}

/// Record that thread `parent_id` started thread `child_id`.
#[unsafe(no_mangle)]
pub extern "C" fn d2_notify_start(parent_id: usize, child_id: usize) {
    best_effort(
        "d2_notify_start",
        framework::global().notify_start(ThreadId(parent_id), ThreadId(child_id)),
    );
}

/// Record that thread `parent_id` joined thread `child_id`.
#[unsafe(no_mangle)]
pub extern "C" fn d2_notify_join(parent_id: usize, child_id: usize) {
    best_effort(
        "d2_notify_join",
        framework::global().notify_join(ThreadId(parent_id), ThreadId(child_id)),
    );
}
