//! Identifier and segment value types.
//!
//! Threads and locks are denoted by opaque dense integers minted from
//! process-wide atomic counters. Segments are totally ordered tags minted
//! by the framework at thread start and join points; segment 0 is the
//! initial segment of the main thread.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Anything that can hand out a stable process-unique integer identity.
pub trait UniquelyIdentifiable {
    fn unique_id(&self) -> usize;
}

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);
static NEXT_LOCK_ID: AtomicUsize = AtomicUsize::new(0);

/// Mint a fresh thread identifier.
pub fn fresh_thread_id() -> ThreadId {
    ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::AcqRel))
}

/// Mint a fresh lock identifier.
pub fn fresh_lock_id() -> LockId {
    LockId(NEXT_LOCK_ID.fetch_add(1, Ordering::AcqRel))
}

thread_local! {
    static CURRENT_THREAD_ID: ThreadId = fresh_thread_id();
}

/// Identifier of the calling thread, minted lazily on first participation
/// and stable for the thread's lifetime.
pub fn current_thread_id() -> ThreadId {
    CURRENT_THREAD_ID.with(|id| *id)
}

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub usize);

        impl UniquelyIdentifiable for $name {
            fn unique_id(&self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<usize>().map($name)
            }
        }

        impl From<usize> for $name {
            fn from(raw: usize) -> Self {
                $name(raw)
            }
        }
    };
}

id_type! {
    /// Opaque dense identifier of an observed thread.
    ThreadId
}

id_type! {
    /// Opaque dense identifier of an observed lock.
    LockId
}

id_type! {
    /// A totally ordered tag for an interval of a thread's execution between
    /// successive start/join boundaries. Immutable once minted.
    Segment
}

impl Segment {
    /// The next numeric segment. Minting through `succ` is what keeps the
    /// segmentation graph acyclic: edges always point from a smaller label
    /// to an equal-or-larger one.
    pub fn succ(self) -> Segment {
        Segment(self.0 + 1)
    }
}

impl Default for Segment {
    fn default() -> Self {
        Segment(0)
    }
}
