//! Shared harness for the end-to-end scenarios.
//!
//! Each scenario file drives the process-wide framework against a fresh
//! temporary repository, then reloads the repository and runs the
//! analyzer. One scenario per file: the framework is a process-wide
//! singleton and `cargo test` gives every test file its own process.

use gatelock::{DeadlockDiagnostic, Gatelock, LockId, ThreadId, analyze_repository, global};
use std::path::PathBuf;
use tempfile::TempDir;

pub struct Scenario {
    root: PathBuf,
    _tmp: TempDir,
}

/// Start capture into a fresh repository.
pub fn begin() -> Scenario {
    let tmp = TempDir::new().expect("failed to create scenario tempdir");
    let root = tmp.path().join("repo");
    Gatelock::new()
        .repository(&root)
        .start()
        .expect("failed to start capture");
    Scenario { root, _tmp: tmp }
}

impl Scenario {
    /// Stop capture and run the post-mortem analysis.
    pub fn finish(self) -> Vec<DeadlockDiagnostic> {
        global().disable();
        global().unset_repository();
        analyze_repository(&self.root).expect("failed to analyze the captured repository")
    }
}

/// Order-insensitive comparison of diagnostics against expected streaks.
///
/// A diagnostic's streaks form a cycle, so each is rotated to a canonical
/// starting point before comparing, and the set of diagnostics itself is
/// compared sorted.
#[allow(dead_code)]
pub fn assert_deadlocks(
    diagnostics: &[DeadlockDiagnostic],
    expected: &[&[(ThreadId, &[LockId])]],
) {
    let canonical = |mut streaks: Vec<(ThreadId, Vec<LockId>)>| {
        let min = streaks
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.clone())
            .map(|(i, _)| i)
            .unwrap_or(0);
        streaks.rotate_left(min);
        streaks
    };

    let mut actual: Vec<_> = diagnostics
        .iter()
        .map(|d| {
            canonical(
                d.streaks
                    .iter()
                    .map(|s| (s.thread, s.locks.clone()))
                    .collect(),
            )
        })
        .collect();
    let mut wanted: Vec<_> = expected
        .iter()
        .map(|d| canonical(d.iter().map(|(t, l)| (*t, l.to_vec())).collect()))
        .collect();

    actual.sort();
    wanted.sort();
    assert_eq!(
        actual, wanted,
        "analysis reported different deadlocks than expected"
    );
}

/// Assert that the analysis found nothing.
#[allow(dead_code)]
pub fn assert_no_deadlocks(diagnostics: &[DeadlockDiagnostic]) {
    assert!(
        diagnostics.is_empty(),
        "expected no deadlock potential, found: {diagnostics:#?}"
    );
}
