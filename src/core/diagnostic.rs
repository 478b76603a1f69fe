//! Diagnostic value types and their plain-text rendering.

use crate::core::types::{LockId, ThreadId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The slice of a deadlock cycle attributable to one thread: the locks it
/// acquired, in acquisition order, ending with the lock it would wait for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireStreak {
    pub thread: ThreadId,
    pub locks: Vec<LockId>,
}

impl AcquireStreak {
    pub fn new(thread: ThreadId, locks: Vec<LockId>) -> Self {
        AcquireStreak { thread, locks }
    }
}

impl fmt::Display for AcquireStreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {} acquired ", self.thread)?;
        for (i, lock) in self.locks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{lock}")?;
        }
        Ok(())
    }
}

/// A state which, if reached, would deadlock the program: one streak per
/// thread run in the offending cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockDiagnostic {
    pub streaks: Vec<AcquireStreak>,
}

impl DeadlockDiagnostic {
    pub fn new(streaks: Vec<AcquireStreak>) -> Self {
        DeadlockDiagnostic { streaks }
    }
}

/// Renders the explanation format consumed by humans:
///
/// ```text
/// thread 1 acquired 10, 30, 20
/// while
/// thread 2 acquired 20, 30, 10
/// which creates a deadlock if
///     thread 1 acquires 10 and waits for 20
///     thread 2 acquires 20 and waits for 10
/// ```
impl fmt::Display for DeadlockDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, streak) in self.streaks.iter().enumerate() {
            if i > 0 {
                writeln!(f, "while")?;
            }
            writeln!(f, "{streak}")?;
        }
        writeln!(f, "which creates a deadlock if")?;
        for (i, streak) in self.streaks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "    thread {} acquires {} and waits for {}",
                streak.thread,
                streak.locks.first().expect("streaks are never empty"),
                streak.locks.last().expect("streaks are never empty"),
            )?;
        }
        Ok(())
    }
}
