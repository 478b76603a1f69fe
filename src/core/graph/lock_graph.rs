//! Lock graph: a directed multigraph over lock ids.
//!
//! An edge `l1 -> l2` witnesses that some thread held `l1` when it
//! acquired `l2`. When a thread holds several locks and acquires another,
//! an edge is emitted from *every* held lock to the new one, not only the
//! most recent. This transitive closure is what lets the analyzer find
//! cycles whose intermediate lock is held inside a single thread.
//!
//! Edge labels keep the full list of locks held at the target acquisition
//! in acquisition order. The gatelocks of an edge are the prefix of that
//! list before the source: locks taken before `l1` and still held at
//! `l2`, i.e. locks held around the whole nesting. A lock taken between
//! `l1` and `l2` does not serialize two threads traversing the edge and
//! so must not count as a gate.

use crate::core::event::{CallStack, Event};
use crate::core::types::{LockId, Segment, ThreadId};
use fxhash::{FxHashMap, FxHashSet};

/// Label of one witnessed nesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGraphEdge {
    pub source: LockId,
    pub target: LockId,
    /// Thread that witnessed the nesting.
    pub thread: ThreadId,
    /// Segment the thread was in when it acquired the source.
    pub s1: Segment,
    /// Segment the thread was in when it acquired the target.
    pub s2: Segment,
    /// Every lock held when the target was acquired, in acquisition
    /// order. Contains the source at `source_index`.
    pub held: Vec<LockId>,
    pub source_index: usize,
    /// Acquisition site of the source, if captured.
    pub stack1: CallStack,
    /// Acquisition site of the target, if captured.
    pub stack2: CallStack,
}

impl LockGraphEdge {
    /// Locks held around the entire `source -> target` nesting: acquired
    /// before the source and still held when the target was acquired.
    pub fn gatelocks(&self) -> &[LockId] {
        &self.held[..self.source_index]
    }
}

/// Directed multigraph of witnessed lock orderings. Immutable once the
/// analyzer starts; duplicate edges are preserved here and coalesced
/// during analysis.
#[derive(Debug, Default)]
pub struct LockGraph {
    edges: Vec<LockGraphEdge>,
    out: FxHashMap<LockId, Vec<usize>>,
    vertices: FxHashSet<LockId>,
}

impl LockGraph {
    pub fn new() -> Self {
        LockGraph::default()
    }

    /// Record a lock id as acquired at least once.
    pub fn add_vertex(&mut self, lock: LockId) {
        self.vertices.insert(lock);
    }

    pub fn add_edge(&mut self, edge: LockGraphEdge) {
        self.vertices.insert(edge.source);
        self.vertices.insert(edge.target);
        self.out.entry(edge.source).or_default().push(self.edges.len());
        self.edges.push(edge);
    }

    pub fn edges(&self) -> &[LockGraphEdge] {
        &self.edges
    }

    /// Indices into [`edges`](Self::edges) of the out-edges of `lock`.
    pub fn out_edges(&self, lock: LockId) -> &[usize] {
        self.out.get(&lock).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Vertices in ascending id order, for deterministic traversals.
    pub fn sorted_vertices(&self) -> Vec<LockId> {
        let mut vertices: Vec<LockId> = self.vertices.iter().copied().collect();
        vertices.sort();
        vertices
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[derive(Debug)]
struct Hold {
    lock: LockId,
    segment: Segment,
    stack: CallStack,
    depth: usize,
}

#[derive(Debug, Default)]
struct ThreadState {
    holds: Vec<Hold>,
    segment: Segment,
}

/// Folds per-thread event streams into a [`LockGraph`].
///
/// Streams from several threads may be fed interleaved or one after the
/// other; ordering only matters within a thread.
pub struct LockGraphBuilder {
    graph: LockGraph,
    states: FxHashMap<ThreadId, ThreadState>,
    ignore_unrelated: bool,
}

impl LockGraphBuilder {
    /// `ignore_unrelated` makes the builder silently skip process-scope
    /// events found in the stream instead of logging about them.
    pub fn new(ignore_unrelated: bool) -> Self {
        LockGraphBuilder {
            graph: LockGraph::new(),
            states: FxHashMap::default(),
            ignore_unrelated,
        }
    }

    pub fn feed(&mut self, event: &Event) {
        match event {
            Event::Acquire(e) => self.acquire(e.thread, e.lock, e.stack.clone(), false),
            Event::RecursiveAcquire(e) => self.acquire(e.thread, e.lock, e.stack.clone(), true),
            Event::Release(e) => self.release(e.thread, e.lock, false),
            Event::RecursiveRelease(e) => self.release(e.thread, e.lock, true),
            Event::SegmentHop(e) => {
                self.states.entry(e.thread).or_default().segment = e.segment;
            }
            Event::Start(_) | Event::Join(_) => {
                if !self.ignore_unrelated {
                    log::warn!("lock-graph builder skipping out-of-scope event {event:?}");
                }
            }
        }
    }

    /// Number of locks the builder believes `thread` still holds. Zero
    /// after any balanced sequence.
    pub fn outstanding_holds(&self, thread: ThreadId) -> usize {
        self.states
            .get(&thread)
            .map(|state| state.holds.len())
            .unwrap_or(0)
    }

    pub fn finish(self) -> LockGraph {
        for (thread, state) in &self.states {
            if !state.holds.is_empty() {
                log::warn!(
                    "thread {thread} ended its stream still holding {} lock(s)",
                    state.holds.len()
                );
            }
        }
        self.graph
    }

    fn acquire(&mut self, thread: ThreadId, lock: LockId, stack: CallStack, recursive: bool) {
        let state = self.states.entry(thread).or_default();
        self.graph.add_vertex(lock);

        if recursive {
            if let Some(hold) = state.holds.iter_mut().find(|h| h.lock == lock) {
                hold.depth += 1;
                return;
            }
        }

        let held: Vec<LockId> = state.holds.iter().map(|h| h.lock).collect();
        for (source_index, hold) in state.holds.iter().enumerate() {
            self.graph.add_edge(LockGraphEdge {
                source: hold.lock,
                target: lock,
                thread,
                s1: hold.segment,
                s2: state.segment,
                held: held.clone(),
                source_index,
                stack1: hold.stack.clone(),
                stack2: stack.clone(),
            });
        }

        state.holds.push(Hold {
            lock,
            segment: state.segment,
            stack,
            depth: 1,
        });
    }

    fn release(&mut self, thread: ThreadId, lock: LockId, recursive: bool) {
        let state = self.states.entry(thread).or_default();
        let Some(index) = state.holds.iter().rposition(|h| h.lock == lock) else {
            // InvalidReleaseOrder: skip the spurious release and carry on
            log::warn!("thread {thread} released lock {lock} it does not hold; skipping");
            return;
        };

        if recursive {
            let hold = &mut state.holds[index];
            hold.depth -= 1;
            if hold.depth > 0 {
                return;
            }
        }
        state.holds.remove(index);
    }
}
