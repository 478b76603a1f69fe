//! Post-mortem loading of a repository back into typed events.
//!
//! The loader hands out single-pass iterators: one over the process-wide
//! stream for the segmentation-graph builder, and one per thread file for
//! the lock-graph builder. A crash-truncated final line surfaces as
//! `MalformedEvent` with its byte offset after every preceding event has
//! been delivered.

use crate::core::error::EventError;
use crate::core::event::{Event, EventCursor};
use crate::core::sink::PROCESS_WIDE_FILE;
use crate::core::types::ThreadId;
use std::fs;
use std::path::{Path, PathBuf};

/// Read access to an on-disk repository directory.
pub struct RepositoryLoader {
    root: PathBuf,
}

impl RepositoryLoader {
    /// Open a repository for reading. Fails if `root` is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<RepositoryLoader, EventError> {
        let root = root.into();
        let meta = fs::metadata(&root)
            .map_err(|e| EventError::repository_unavailable(&root, e))?;
        if !meta.is_dir() {
            return Err(EventError::repository_unavailable(
                &root,
                std::io::Error::new(
                    std::io::ErrorKind::NotADirectory,
                    "repository root is not a directory",
                ),
            ));
        }
        Ok(RepositoryLoader { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every thread with a stream in the repository, in ascending id order.
    pub fn thread_ids(&self) -> Result<Vec<ThreadId>, EventError> {
        let entries =
            fs::read_dir(&self.root).map_err(|e| EventError::repository_unavailable(&self.root, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| EventError::repository_unavailable(&self.root, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Ok(id) = name.parse::<ThreadId>() {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Single-pass iterator over the process-scope events (start/join).
    /// A missing `process_wide` file means no thread was ever started.
    pub fn process_events(&self) -> Result<EventStream, EventError> {
        let path = self.root.join(PROCESS_WIDE_FILE);
        if !path.exists() {
            return Ok(EventStream::empty());
        }
        EventStream::from_file(&path)
    }

    /// Single-pass iterator over one thread's events, in issue order.
    pub fn thread_events(&self, thread: ThreadId) -> Result<EventStream, EventError> {
        EventStream::from_file(&self.root.join(thread.to_string()))
    }
}

/// Owning iterator over one repository file. Yields events until the file
/// is exhausted or a malformed line is hit; the error is yielded once and
/// the stream then fuses.
pub struct EventStream {
    bytes: Vec<u8>,
    pos: usize,
    dead: bool,
}

impl EventStream {
    fn empty() -> EventStream {
        EventStream {
            bytes: Vec::new(),
            pos: 0,
            dead: false,
        }
    }

    fn from_file(path: &Path) -> Result<EventStream, EventError> {
        let bytes =
            fs::read(path).map_err(|e| EventError::repository_unavailable(path, e))?;
        Ok(EventStream {
            bytes,
            pos: 0,
            dead: false,
        })
    }
}

impl Iterator for EventStream {
    type Item = Result<Event, EventError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.dead {
            return None;
        }
        let mut cursor = EventCursor::new(&self.bytes[self.pos..]);
        let base = self.pos as u64;
        match cursor.next_event() {
            Ok(Some(event)) => {
                self.pos += cursor.offset() as usize;
                Some(Ok(event))
            }
            Ok(None) => None,
            Err(EventError::MalformedEvent { offset, expected }) => {
                self.dead = true;
                Some(Err(EventError::MalformedEvent {
                    offset: base + offset,
                    expected,
                }))
            }
            Err(other) => {
                self.dead = true;
                Some(Err(other))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{AcquireEvent, ReleaseEvent, SegmentHopEvent, StartEvent};
    use crate::core::sink::FilesystemDispatcher;
    use crate::core::types::{LockId, Segment};
    use tempfile::TempDir;

    #[test]
    fn reloads_what_the_dispatcher_wrote() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        let dispatcher = FilesystemDispatcher::new();
        dispatcher.set_root(&root).unwrap();

        let written = vec![
            Event::Acquire(AcquireEvent::new(ThreadId(2), LockId(8))),
            Event::SegmentHop(SegmentHopEvent {
                thread: ThreadId(2),
                segment: Segment(3),
            }),
            Event::Acquire(AcquireEvent::new(ThreadId(2), LockId(9))),
            Event::Release(ReleaseEvent {
                thread: ThreadId(2),
                lock: LockId(9),
            }),
            Event::Release(ReleaseEvent {
                thread: ThreadId(2),
                lock: LockId(8),
            }),
        ];
        for event in &written {
            dispatcher.dispatch(event).unwrap();
        }
        dispatcher
            .dispatch(&Event::Start(StartEvent {
                parent: ThreadId(0),
                before: Segment(0),
                after: Segment(1),
                child: Segment(2),
            }))
            .unwrap();
        dispatcher.unset_root();

        let loader = RepositoryLoader::open(&root).unwrap();
        assert_eq!(loader.thread_ids().unwrap(), vec![ThreadId(2)]);

        let reloaded: Vec<Event> = loader
            .thread_events(ThreadId(2))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(reloaded, written);

        let process: Vec<Event> = loader
            .process_events()
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(process.len(), 1);
        assert!(matches!(process[0], Event::Start(_)));
    }

    #[test]
    fn truncated_tail_yields_prefix_then_error() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir(&root).unwrap();
        // a full line followed by a crash-truncated one
        std::fs::write(root.join("4"), "4?1?0?\n4?2?").unwrap();

        let loader = RepositoryLoader::open(&root).unwrap();
        let mut stream = loader.thread_events(ThreadId(4)).unwrap();

        assert_eq!(
            stream.next().unwrap().unwrap(),
            Event::Acquire(AcquireEvent::new(ThreadId(4), LockId(1)))
        );
        match stream.next().unwrap() {
            Err(EventError::MalformedEvent { offset, .. }) => assert_eq!(offset, 11),
            other => panic!("expected MalformedEvent, got {other:?}"),
        }
        assert!(stream.next().is_none(), "stream must fuse after an error");
    }

    #[test]
    fn open_rejects_missing_directory() {
        let tmp = TempDir::new().unwrap();
        assert!(RepositoryLoader::open(tmp.path().join("nope")).is_err());
    }

    #[test]
    fn missing_process_wide_file_is_an_empty_stream() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir(&root).unwrap();

        let loader = RepositoryLoader::open(&root).unwrap();
        assert_eq!(loader.process_events().unwrap().count(), 0);
    }

    #[test]
    fn non_numeric_files_are_not_thread_streams() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join(PROCESS_WIDE_FILE), "").unwrap();
        std::fs::write(root.join("7"), "").unwrap();

        let loader = RepositoryLoader::open(&root).unwrap();
        assert_eq!(loader.thread_ids().unwrap(), vec![ThreadId(7)]);
    }
}
