//! Event sinks and the filesystem dispatcher.
//!
//! A repository is a directory holding one append-only file per observed
//! thread (named by the thread id) plus a `process_wide` file for
//! start/join events. The dispatcher owns every open sink and hands each
//! writing thread a stable handle to its own sink, so the map lock is
//! never held while event bytes are written.
//!
//! Sink handles resolved through the map are cached thread-locally and
//! tagged with a generation counter; rerooting the repository bumps the
//! generation, which forces every thread to re-resolve on its next write.

use crate::core::error::EventError;
use crate::core::event::{Event, EventScope};
use crate::core::types::ThreadId;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Name of the file holding every process-scope event.
pub const PROCESS_WIDE_FILE: &str = "process_wide";

/// An append-only stream of formatted events backed by one repository file.
pub struct EventSink {
    writer: BufWriter<File>,
}

impl EventSink {
    fn open(path: &Path) -> Result<EventSink, EventError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EventError::repository_unavailable(path, e))?;
        Ok(EventSink {
            writer: BufWriter::new(file),
        })
    }

    /// Append one event, newline-terminated, and push it to the OS so a
    /// crash only ever truncates the line being written.
    pub fn write_event(&mut self, event: &Event) -> Result<(), EventError> {
        writeln!(self.writer, "{event}")?;
        self.writer.flush()?;
        Ok(())
    }
}

type SharedSink = Arc<Mutex<EventSink>>;

struct CachedSink {
    dispatcher: u64,
    generation: u64,
    thread: ThreadId,
    sink: SharedSink,
}

thread_local! {
    static SINK_CACHE: RefCell<Option<CachedSink>> = const { RefCell::new(None) };
}

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(0);

/// Routes events from concurrently notifying threads into the repository.
///
/// Three pieces of state, each behind its own short-lived lock: the
/// repository root, the process-wide sink, and the per-thread sink map.
/// Setting the root is the only operation that suspends writers.
pub struct FilesystemDispatcher {
    id: u64,
    root: Mutex<Option<PathBuf>>,
    process_sink: Mutex<Option<EventSink>>,
    thread_sinks: Mutex<FxHashMap<ThreadId, SharedSink>>,
    generation: AtomicU64,
}

impl Default for FilesystemDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FilesystemDispatcher {
    pub fn new() -> Self {
        FilesystemDispatcher {
            id: NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed),
            root: Mutex::new(None),
            process_sink: Mutex::new(None),
            thread_sinks: Mutex::new(FxHashMap::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Point the dispatcher at a repository directory, creating it if
    /// needed. Fails if the target exists and is not an empty directory.
    /// Old sinks are closed and every thread-local handle is invalidated.
    pub fn set_root(&self, path: &Path) -> Result<(), EventError> {
        match fs::metadata(path) {
            Ok(meta) => {
                let empty_dir = meta.is_dir()
                    && fs::read_dir(path)
                        .map_err(|e| EventError::repository_unavailable(path, e))?
                        .next()
                        .is_none();
                if !empty_dir {
                    return Err(EventError::repository_unavailable(
                        path,
                        std::io::Error::new(
                            std::io::ErrorKind::AlreadyExists,
                            "target exists and is not an empty directory",
                        ),
                    ));
                }
            }
            Err(_) => {
                fs::create_dir_all(path)
                    .map_err(|e| EventError::repository_unavailable(path, e))?;
            }
        }

        let process_sink = EventSink::open(&path.join(PROCESS_WIDE_FILE))?;

        // Swap the process sink, then the root, then drop the per-thread
        // sinks. The root must change before the map clears or a racing
        // writer could re-open a sink under the old root.
        *self.process_sink.lock() = Some(process_sink);
        *self.root.lock() = Some(path.to_path_buf());
        self.thread_sinks.lock().clear();
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Close every sink and detach from the repository. Subsequent
    /// dispatches are silent no-ops until a new root is set.
    pub fn unset_root(&self) {
        *self.root.lock() = None;
        *self.process_sink.lock() = None;
        self.thread_sinks.lock().clear();
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether a repository is currently attached.
    pub fn has_root(&self) -> bool {
        self.root.lock().is_some()
    }

    /// Current repository directory, if any.
    pub fn root(&self) -> Option<PathBuf> {
        self.root.lock().clone()
    }

    /// Write an event to the stream its scope demands. Without an attached
    /// repository this is a no-op: capture is best-effort and off by
    /// default.
    pub fn dispatch(&self, event: &Event) -> Result<(), EventError> {
        match event.scope() {
            EventScope::Thread => {
                let thread = event
                    .owning_thread()
                    .expect("thread-scope events always name their thread");
                let Some(sink) = self.thread_sink(thread)? else {
                    return Ok(());
                };
                sink.lock().write_event(event)
            }
            EventScope::Process | EventScope::Machine => {
                let mut guard = self.process_sink.lock();
                match guard.as_mut() {
                    Some(sink) => sink.write_event(event),
                    None => Ok(()),
                }
            }
        }
    }

    /// Resolve the calling context's handle for `thread`'s sink, consulting
    /// the thread-local cache first. Returns `None` when no repository is
    /// attached.
    fn thread_sink(&self, thread: ThreadId) -> Result<Option<SharedSink>, EventError> {
        let generation = self.generation.load(Ordering::SeqCst);

        let cached = SINK_CACHE.with(|cache| {
            cache.borrow().as_ref().and_then(|c| {
                (c.dispatcher == self.id && c.generation == generation && c.thread == thread)
                    .then(|| Arc::clone(&c.sink))
            })
        });
        if let Some(sink) = cached {
            return Ok(Some(sink));
        }

        let root = match self.root.lock().clone() {
            Some(root) => root,
            None => return Ok(None),
        };

        let sink = {
            let mut sinks = self.thread_sinks.lock();
            match sinks.get(&thread) {
                Some(sink) => Arc::clone(sink),
                None => {
                    let sink = Arc::new(Mutex::new(EventSink::open(
                        &root.join(thread.to_string()),
                    )?));
                    sinks.insert(thread, Arc::clone(&sink));
                    sink
                }
            }
        };

        SINK_CACHE.with(|cache| {
            *cache.borrow_mut() = Some(CachedSink {
                dispatcher: self.id,
                generation,
                thread,
                sink: Arc::clone(&sink),
            });
        });
        Ok(Some(sink))
    }
}
