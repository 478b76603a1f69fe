//! Synchronization event model and its canonical textual form.
//!
//! Each event variant owns a one-line form opened by a distinctive
//! delimiter, so a stream of mixed events parses with a single byte of
//! look-ahead past the leading integer:
//!
//! ```text
//! Acquire             THREAD?LOCK?NFRAMES?frame…
//! RecursiveAcquire    r + the Acquire form
//! Release             THREAD;LOCK;
//! RecursiveRelease    r + the Release form
//! Start               PARENT~BEFORE~AFTER~CHILD~
//! Join                PARENT^BEFORE^AFTER^CHILD^
//! SegmentHop          THREAD>SEGMENT>
//!
//! frame := IP?FLEN:FUNCTION?MLEN:MODULE?
//! ```
//!
//! Numeric fields are base-10 unsigned integers. `FLEN`/`MLEN` prefix the
//! byte length of the string that follows, so symbol names never collide
//! with the delimiters. Every line ends with `\n`, which keeps repository
//! files concatenable and readable.

use crate::core::error::EventError;
use crate::core::types::{LockId, Segment, ThreadId};
use std::fmt;
use std::str::FromStr;

/// One frame of a captured acquisition site. Capture itself is platform
/// work that happens outside the core; the core only stores and compares
/// frames structurally.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StackFrame {
    pub ip: usize,
    pub function: String,
    pub module: String,
}

impl StackFrame {
    pub fn new(ip: usize, function: impl Into<String>, module: impl Into<String>) -> Self {
        StackFrame {
            ip,
            function: function.into(),
            module: module.into(),
        }
    }
}

/// An acquisition site. Empty means no trace was captured.
pub type CallStack = Vec<StackFrame>;

/// Non-recursive or recursive acquisition of a lock by a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireEvent {
    pub thread: ThreadId,
    pub lock: LockId,
    pub stack: CallStack,
}

impl AcquireEvent {
    pub fn new(thread: ThreadId, lock: LockId) -> Self {
        AcquireEvent {
            thread,
            lock,
            stack: CallStack::new(),
        }
    }

    pub fn with_stack(thread: ThreadId, lock: LockId, stack: CallStack) -> Self {
        AcquireEvent {
            thread,
            lock,
            stack,
        }
    }
}

/// Non-recursive or recursive release of a lock by a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseEvent {
    pub thread: ThreadId,
    pub lock: LockId,
}

/// A parent thread spawned a child. `before` is the parent's segment up to
/// the spawn, `after` the parent's segment from the spawn on, `child` the
/// child's first segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartEvent {
    pub parent: ThreadId,
    pub before: Segment,
    pub after: Segment,
    pub child: Segment,
}

/// A parent thread joined a child. `child_final` is the segment the child
/// was in when it finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinEvent {
    pub parent: ThreadId,
    pub before: Segment,
    pub after: Segment,
    pub child_final: Segment,
}

/// A thread moved to a new segment without spawning or joining. Emitted by
/// the framework into the thread streams so later lock events can be
/// placed in the right segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHopEvent {
    pub thread: ThreadId,
    pub segment: Segment,
}

/// Which streams an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
    Thread,
    Process,
    Machine,
}

/// Whether the dispatcher must preserve issue order for an event. All
/// current events are `StrictOrder`; the tag exists so future events can
/// opt into unordered fast paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingPolicy {
    StrictOrder,
    NoOrder,
}

/// A record of a single observed synchronization action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Acquire(AcquireEvent),
    Release(ReleaseEvent),
    RecursiveAcquire(AcquireEvent),
    RecursiveRelease(ReleaseEvent),
    Start(StartEvent),
    Join(JoinEvent),
    SegmentHop(SegmentHopEvent),
}

impl Event {
    pub fn scope(&self) -> EventScope {
        match self {
            Event::Acquire(_)
            | Event::Release(_)
            | Event::RecursiveAcquire(_)
            | Event::RecursiveRelease(_)
            | Event::SegmentHop(_) => EventScope::Thread,
            Event::Start(_) | Event::Join(_) => EventScope::Process,
        }
    }

    pub fn ordering(&self) -> OrderingPolicy {
        OrderingPolicy::StrictOrder
    }

    /// The thread a thread-scope event belongs to; `None` for process-scope
    /// events, which live in the process-wide stream.
    pub fn owning_thread(&self) -> Option<ThreadId> {
        match self {
            Event::Acquire(e) | Event::RecursiveAcquire(e) => Some(e.thread),
            Event::Release(e) | Event::RecursiveRelease(e) => Some(e.thread),
            Event::SegmentHop(e) => Some(e.thread),
            Event::Start(_) | Event::Join(_) => None,
        }
    }
}

fn format_acquire(out: &mut String, e: &AcquireEvent) {
    use fmt::Write;
    write!(out, "{}?{}?{}?", e.thread, e.lock, e.stack.len()).unwrap();
    for frame in &e.stack {
        write!(
            out,
            "{}?{}:{}?{}:{}?",
            frame.ip,
            frame.function.len(),
            frame.function,
            frame.module.len(),
            frame.module
        )
        .unwrap();
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut line = String::new();
        match self {
            Event::Acquire(e) => format_acquire(&mut line, e),
            Event::RecursiveAcquire(e) => {
                line.push('r');
                format_acquire(&mut line, e);
            }
            Event::Release(e) => {
                use fmt::Write;
                write!(line, "{};{};", e.thread, e.lock).unwrap();
            }
            Event::RecursiveRelease(e) => {
                use fmt::Write;
                write!(line, "r{};{};", e.thread, e.lock).unwrap();
            }
            Event::Start(e) => {
                use fmt::Write;
                write!(line, "{}~{}~{}~{}~", e.parent, e.before, e.after, e.child).unwrap();
            }
            Event::Join(e) => {
                use fmt::Write;
                write!(
                    line,
                    "{}^{}^{}^{}^",
                    e.parent, e.before, e.after, e.child_final
                )
                .unwrap();
            }
            Event::SegmentHop(e) => {
                use fmt::Write;
                write!(line, "{}>{}>", e.thread, e.segment).unwrap();
            }
        }
        f.write_str(&line)
    }
}

/// Single-pass cursor decoding events from a byte buffer, tracking the
/// absolute offset so malformed input can be reported precisely.
pub struct EventCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> EventCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        EventCursor { bytes, pos: 0 }
    }

    /// Absolute byte offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.pos as u64
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn malformed(&self, expected: &'static str) -> EventError {
        EventError::MalformedEvent {
            offset: self.pos as u64,
            expected,
        }
    }

    fn expect(&mut self, delim: u8, expected: &'static str) -> Result<(), EventError> {
        match self.peek() {
            Some(b) if b == delim => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.malformed(expected)),
        }
    }

    fn unsigned(&mut self, expected: &'static str) -> Result<usize, EventError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.malformed(expected));
        }
        // digits only, so the unwrap on from_utf8 cannot fire
        std::str::from_utf8(&self.bytes[start..self.pos])
            .unwrap()
            .parse::<usize>()
            .map_err(|_| EventError::MalformedEvent {
                offset: start as u64,
                expected,
            })
    }

    fn length_prefixed_string(&mut self, expected: &'static str) -> Result<String, EventError> {
        let len = self.unsigned(expected)?;
        self.expect(b':', "':' after string length")?;
        let start = self.pos;
        if start + len > self.bytes.len() {
            return Err(self.malformed("string bytes"));
        }
        self.pos += len;
        String::from_utf8(self.bytes[start..self.pos].to_vec()).map_err(|_| {
            EventError::MalformedEvent {
                offset: start as u64,
                expected: "utf-8 string",
            }
        })
    }

    fn acquire_tail(&mut self, thread: ThreadId) -> Result<AcquireEvent, EventError> {
        let lock = LockId(self.unsigned("lock id")?);
        self.expect(b'?', "'?' after lock id")?;
        let nframes = self.unsigned("frame count")?;
        self.expect(b'?', "'?' after frame count")?;
        // cap the preallocation; a corrupt frame count should fail parsing,
        // not exhaust memory
        let mut stack = CallStack::with_capacity(nframes.min(128));
        for _ in 0..nframes {
            let ip = self.unsigned("frame ip")?;
            self.expect(b'?', "'?' after frame ip")?;
            let function = self.length_prefixed_string("function length")?;
            self.expect(b'?', "'?' after function name")?;
            let module = self.length_prefixed_string("module length")?;
            self.expect(b'?', "'?' after module name")?;
            stack.push(StackFrame {
                ip,
                function,
                module,
            });
        }
        Ok(AcquireEvent::with_stack(thread, lock, stack))
    }

    /// Decode the next event, or `None` at end of input. A truncated or
    /// garbled line fails with the offset and the token that was expected;
    /// everything decoded before it stands.
    pub fn next_event(&mut self) -> Result<Option<Event>, EventError> {
        if self.peek().is_none() {
            return Ok(None);
        }

        let recursive = self.peek() == Some(b'r');
        if recursive {
            self.pos += 1;
        }

        let first = self.unsigned("event header integer")?;
        let delim = self.peek();
        if delim.is_some() {
            self.pos += 1;
        }
        let event = match delim {
            Some(b'?') => {
                let acquire = self.acquire_tail(ThreadId(first))?;
                if recursive {
                    Event::RecursiveAcquire(acquire)
                } else {
                    Event::Acquire(acquire)
                }
            }
            Some(b';') => {
                let lock = LockId(self.unsigned("lock id")?);
                self.expect(b';', "';' after lock id")?;
                let release = ReleaseEvent {
                    thread: ThreadId(first),
                    lock,
                };
                if recursive {
                    Event::RecursiveRelease(release)
                } else {
                    Event::Release(release)
                }
            }
            Some(b'~') if !recursive => {
                let before = Segment(self.unsigned("parent segment")?);
                self.expect(b'~', "'~' after parent segment")?;
                let after = Segment(self.unsigned("new parent segment")?);
                self.expect(b'~', "'~' after new parent segment")?;
                let child = Segment(self.unsigned("child segment")?);
                self.expect(b'~', "'~' after child segment")?;
                Event::Start(StartEvent {
                    parent: ThreadId(first),
                    before,
                    after,
                    child,
                })
            }
            Some(b'^') if !recursive => {
                let before = Segment(self.unsigned("parent segment")?);
                self.expect(b'^', "'^' after parent segment")?;
                let after = Segment(self.unsigned("new parent segment")?);
                self.expect(b'^', "'^' after new parent segment")?;
                let child_final = Segment(self.unsigned("final child segment")?);
                self.expect(b'^', "'^' after final child segment")?;
                Event::Join(JoinEvent {
                    parent: ThreadId(first),
                    before,
                    after,
                    child_final,
                })
            }
            Some(b'>') if !recursive => {
                let segment = Segment(self.unsigned("segment")?);
                self.expect(b'>', "'>' after segment")?;
                Event::SegmentHop(SegmentHopEvent {
                    thread: ThreadId(first),
                    segment,
                })
            }
            _ => {
                if delim.is_some() {
                    self.pos -= 1;
                }
                return Err(self.malformed("event delimiter"));
            }
        };

        self.expect(b'\n', "newline after event")?;
        Ok(Some(event))
    }
}

impl FromStr for Event {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let owned;
        let bytes = if s.ends_with('\n') {
            s.as_bytes()
        } else {
            owned = format!("{s}\n");
            owned.as_bytes()
        };

        let mut cursor = EventCursor::new(bytes);
        let event = cursor
            .next_event()?
            .ok_or(EventError::MalformedEvent {
                offset: 0,
                expected: "an event",
            })?;
        if cursor.peek().is_some() {
            return Err(EventError::MalformedEvent {
                offset: cursor.offset(),
                expected: "end of input",
            });
        }
        Ok(event)
    }
}
