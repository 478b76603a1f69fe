// Core types
pub mod types;
pub use types::*;

// Event model and wire format
pub mod event;

// Error kinds
pub mod error;

// Capture side: sinks and the facade
pub mod sink;
pub mod framework;

// Post-mortem side: loader, graphs, analysis
pub mod loader;
pub mod graph;
pub mod analysis;
pub mod diagnostic;

// Thin wrappers around host primitives
pub mod tracked_mutex;
pub use tracked_mutex::TrackedMutex;

pub mod tracked_thread;
pub use tracked_thread::TrackedThread;

use crate::core::analysis::analyze;
use crate::core::diagnostic::DeadlockDiagnostic;
use crate::core::graph::{LockGraphBuilder, SegmentationGraphBuilder};
use crate::core::loader::RepositoryLoader;
use anyhow::{Context, Result};
use std::path::Path;

/// Gatelock configuration builder.
///
/// Points the process-wide framework at a repository and switches capture
/// on:
///
/// ```no_run
/// use gatelock::Gatelock;
///
/// Gatelock::new()
///     .repository("traces/run_{timestamp}")
///     .start()
///     .expect("failed to start capture");
/// ```
#[derive(Default)]
pub struct Gatelock {
    repository: Option<String>,
}

impl Gatelock {
    pub fn new() -> Self {
        Gatelock { repository: None }
    }

    /// Directory the captured events are written to. A `{timestamp}`
    /// placeholder is replaced with the current UTC time.
    pub fn repository<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.repository = Some(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Attach the repository (if configured) and enable event capture on
    /// the process-wide framework.
    pub fn start(self) -> Result<()> {
        let framework = framework::global();
        if let Some(path) = self.repository {
            framework
                .set_repository(&path)
                .with_context(|| format!("failed to open event repository at {path}"))?;
        }
        framework.enable();
        Ok(())
    }
}

/// Load a repository and fold it into the two derived graphs. Malformed
/// tails are logged and everything before them is still used.
pub fn build_graphs(
    path: impl AsRef<Path>,
) -> Result<(graph::LockGraph, graph::SegmentationGraph)> {
    let loader = RepositoryLoader::open(path.as_ref())
        .with_context(|| format!("failed to open repository {}", path.as_ref().display()))?;

    let mut segmentation = SegmentationGraphBuilder::new(true);
    for event in loader.process_events()? {
        match event {
            Ok(event) => segmentation.feed(&event),
            Err(e) => {
                log::warn!("process-wide stream cut short: {e}");
                break;
            }
        }
    }

    let mut lock_graph = LockGraphBuilder::new(true);
    for thread in loader.thread_ids()? {
        for event in loader.thread_events(thread)? {
            match event {
                Ok(event) => lock_graph.feed(&event),
                Err(e) => {
                    log::warn!("stream of thread {thread} cut short: {e}");
                    break;
                }
            }
        }
    }

    Ok((lock_graph.finish(), segmentation.finish()))
}

/// Post-mortem convenience: load a repository, build both graphs and run
/// the analyzer.
pub fn analyze_repository(path: impl AsRef<Path>) -> Result<Vec<DeadlockDiagnostic>> {
    let (lock_graph, segmentation) = build_graphs(path)?;
    Ok(analyze(&lock_graph, &segmentation))
}
