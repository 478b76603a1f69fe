//! Error kinds surfaced by the capture and analysis pipeline.
//!
//! Data-shape problems (spurious releases, foreign-scope events) are not
//! errors: the builders log and continue so the analyzer can still report
//! everything deducible from the well-formed part of a trace. Only
//! resource-level failures and unparseable input reach callers.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    /// The loader could not decode an event. `offset` is the absolute byte
    /// position in the source file, `expected` the token that was missing.
    #[error("malformed event at byte {offset}: expected {expected}")]
    MalformedEvent { offset: u64, expected: &'static str },

    /// The repository directory could not be created, opened or listed.
    #[error("repository unavailable at {}: {source}", path.display())]
    RepositoryUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A sink write failed. Notify calls surface this as a nonzero return
    /// code across the C boundary; capture is best-effort.
    #[error("failed to write event: {0}")]
    Io(#[from] io::Error),
}

impl EventError {
    pub fn repository_unavailable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EventError::RepositoryUnavailable {
            path: path.into(),
            source,
        }
    }
}
