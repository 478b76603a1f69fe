//! # Gatelock
//!
//! A dynamic deadlock-potential detector for multithreaded programs.
//!
//! A program under observation reports its synchronization actions (lock
//! acquire/release, thread start/join) through the notify entry points.
//! Gatelock writes them to a filesystem repository (one append-only
//! stream per thread plus a process-wide stream) and, online or
//! post-mortem, folds them into two graphs:
//!
//! - the **lock graph**, whose edges witness "held `l1` while acquiring
//!   `l2`", labeled with the witnessing thread, its segments and the
//!   locks held around the nesting;
//! - the **segmentation graph**, a DAG over execution segments encoding
//!   the happens-before order induced by thread start/join.
//!
//! The analyzer enumerates lock-graph cycles and reports every one that
//! at least two threads could traverse concurrently without a common
//! gatelock: a potential deadlock, found without the program ever
//! hanging.
//!
//! ## Capturing a run
//!
//! ```no_run
//! use gatelock::{Gatelock, TrackedMutex, TrackedThread};
//! use std::sync::Arc;
//!
//! Gatelock::new()
//!     .repository("traces/run_{timestamp}")
//!     .start()
//!     .expect("failed to start capture");
//!
//! let a = Arc::new(TrackedMutex::new(0u32));
//! let b = Arc::new(TrackedMutex::new(0u32));
//!
//! let (a2, b2) = (Arc::clone(&a), Arc::clone(&b));
//! let t = TrackedThread::spawn(move || {
//!     let _b = b2.lock();
//!     let _a = a2.lock();
//! });
//!
//! {
//!     let _a = a.lock();
//!     let _b = b.lock();
//! }
//! t.join().unwrap();
//! ```
//!
//! ## Analyzing it
//!
//! ```no_run
//! for diagnostic in gatelock::analyze_repository("traces/run_x").unwrap() {
//!     println!("{diagnostic}");
//! }
//! ```
//!
//! Instrumented C programs use the `d2_*` functions from the [`ffi`]
//! module instead; the repository format is the same.

mod core;
pub use core::{
    Gatelock, TrackedMutex, TrackedThread, analyze_repository, build_graphs,
    analysis::{analyze, analyze_with},
    diagnostic::{AcquireStreak, DeadlockDiagnostic},
    error::EventError,
    event::{
        AcquireEvent, CallStack, Event, EventScope, JoinEvent, OrderingPolicy, ReleaseEvent,
        SegmentHopEvent, StackFrame, StartEvent,
    },
    framework::{Framework, global},
    graph::{LockGraph, LockGraphBuilder, LockGraphEdge, SegmentationGraph, SegmentationGraphBuilder},
    loader::{EventStream, RepositoryLoader},
    sink::{EventSink, FilesystemDispatcher, PROCESS_WIDE_FILE},
    types::{
        LockId, Segment, ThreadId, UniquelyIdentifiable, current_thread_id, fresh_lock_id,
        fresh_thread_id,
    },
};

pub mod ffi;
