//! Segmentation graph: the happens-before DAG over segments.
//!
//! Vertices are segments; an edge `a -> b` asserts that everything in
//! segment `a` happens before everything in segment `b`. Start events
//! contribute `before -> after` and `before -> child`; join events
//! contribute `before -> after` and `child_final -> after`. The graph is
//! acyclic by construction: segments are minted with strictly increasing
//! labels and edges never point to a smaller label.

use crate::core::event::Event;
use crate::core::types::Segment;
use fxhash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct SegmentationGraph {
    edges: FxHashMap<Segment, FxHashSet<Segment>>,
    vertices: FxHashSet<Segment>,
}

impl SegmentationGraph {
    pub fn new() -> Self {
        SegmentationGraph {
            edges: FxHashMap::default(),
            vertices: FxHashSet::default(),
        }
    }

    pub fn add_vertex(&mut self, segment: Segment) {
        self.vertices.insert(segment);
    }

    pub fn add_edge(&mut self, from: Segment, to: Segment) {
        self.vertices.insert(from);
        self.vertices.insert(to);
        self.edges.entry(from).or_default().insert(to);
    }

    pub fn contains(&self, segment: Segment) -> bool {
        self.vertices.contains(&segment)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(FxHashSet::len).sum()
    }

    /// Whether there is a directed path from `a` to `b`. This is the
    /// happens-before predicate of the analysis. BFS on demand; the graphs
    /// seen in practice have at most thousands of segments.
    pub fn happens_before(&self, a: Segment, b: Segment) -> bool {
        if a == b {
            return false;
        }
        // labels only grow along edges, so a larger label can never reach
        // a smaller one
        if a > b {
            return false;
        }

        let mut queue = VecDeque::new();
        let mut visited = FxHashSet::default();
        queue.push_back(a);
        visited.insert(a);

        while let Some(current) = queue.pop_front() {
            if let Some(successors) = self.edges.get(&current) {
                for &next in successors {
                    if next == b {
                        return true;
                    }
                    if next <= b && visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
        false
    }
}

/// Folds process-scope events into a [`SegmentationGraph`].
pub struct SegmentationGraphBuilder {
    graph: SegmentationGraph,
    ignore_unrelated: bool,
}

impl SegmentationGraphBuilder {
    /// `ignore_unrelated` makes the builder skip thread-scope events that
    /// ended up in the same stream instead of logging about them.
    pub fn new(ignore_unrelated: bool) -> Self {
        let mut graph = SegmentationGraph::new();
        // the main thread's initial segment exists even in a run that
        // never starts a thread
        graph.add_vertex(Segment::default());
        SegmentationGraphBuilder {
            graph,
            ignore_unrelated,
        }
    }

    pub fn feed(&mut self, event: &Event) {
        match event {
            Event::Start(start) => {
                self.graph.add_edge(start.before, start.after);
                self.graph.add_edge(start.before, start.child);
            }
            Event::Join(join) => {
                self.graph.add_edge(join.before, join.after);
                self.graph.add_edge(join.child_final, join.after);
            }
            other => {
                if !self.ignore_unrelated {
                    log::warn!(
                        "segmentation-graph builder skipping out-of-scope event {other:?}"
                    );
                }
            }
        }
    }

    pub fn finish(self) -> SegmentationGraph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{JoinEvent, StartEvent};
    use crate::core::types::ThreadId;

    fn start(parent: usize, before: usize, after: usize, child: usize) -> Event {
        Event::Start(StartEvent {
            parent: ThreadId(parent),
            before: Segment(before),
            after: Segment(after),
            child: Segment(child),
        })
    }

    fn join(parent: usize, before: usize, after: usize, child_final: usize) -> Event {
        Event::Join(JoinEvent {
            parent: ThreadId(parent),
            before: Segment(before),
            after: Segment(after),
            child_final: Segment(child_final),
        })
    }

    /// main starts t1, runs alongside it, joins it.
    fn fork_join_graph() -> SegmentationGraph {
        let mut builder = SegmentationGraphBuilder::new(true);
        builder.feed(&start(0, 0, 1, 2));
        builder.feed(&join(0, 1, 3, 2));
        builder.finish()
    }

    #[test]
    fn start_creates_both_edges() {
        let mut builder = SegmentationGraphBuilder::new(true);
        builder.feed(&start(0, 0, 1, 2));
        let graph = builder.finish();

        assert!(graph.happens_before(Segment(0), Segment(1)));
        assert!(graph.happens_before(Segment(0), Segment(2)));
        assert!(!graph.happens_before(Segment(1), Segment(2)));
        assert!(!graph.happens_before(Segment(2), Segment(1)));
    }

    #[test]
    fn join_orders_child_before_parent_continuation() {
        let graph = fork_join_graph();
        assert!(graph.happens_before(Segment(2), Segment(3)));
        assert!(graph.happens_before(Segment(0), Segment(3)));
        assert!(!graph.happens_before(Segment(3), Segment(2)));
    }

    #[test]
    fn happens_before_is_irreflexive() {
        let graph = fork_join_graph();
        for s in 0..4 {
            assert!(!graph.happens_before(Segment(s), Segment(s)));
        }
    }

    #[test]
    fn sequential_threads_are_ordered() {
        // main starts and joins t1, then starts t2: everything t1 did
        // happens before everything t2 does
        let mut builder = SegmentationGraphBuilder::new(true);
        builder.feed(&start(0, 0, 1, 2));
        builder.feed(&join(0, 1, 3, 2));
        builder.feed(&start(0, 3, 4, 5));
        let graph = builder.finish();

        assert!(graph.happens_before(Segment(2), Segment(5)));
        assert!(!graph.happens_before(Segment(5), Segment(2)));
    }

    #[test]
    fn concurrent_threads_are_unordered() {
        // main starts t1 then t2 without joining either
        let mut builder = SegmentationGraphBuilder::new(true);
        builder.feed(&start(0, 0, 1, 2));
        builder.feed(&start(0, 1, 3, 4));
        let graph = builder.finish();

        assert!(!graph.happens_before(Segment(2), Segment(4)));
        assert!(!graph.happens_before(Segment(4), Segment(2)));
    }

    #[test]
    fn initial_segment_reaches_every_minted_segment() {
        let graph = fork_join_graph();
        for s in 1..4 {
            assert!(
                graph.happens_before(Segment(0), Segment(s)),
                "segment {s} unreachable from the initial segment"
            );
        }
    }

    #[test]
    fn unrelated_events_are_skipped() {
        use crate::core::event::AcquireEvent;
        use crate::core::types::LockId;

        let mut builder = SegmentationGraphBuilder::new(true);
        builder.feed(&Event::Acquire(AcquireEvent::new(ThreadId(1), LockId(1))));
        let graph = builder.finish();
        assert_eq!(graph.vertex_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }
}
