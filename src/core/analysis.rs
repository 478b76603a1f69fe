//! Cycle-based deadlock analysis over the completed graphs.
//!
//! The analyzer coalesces duplicate lock-graph edges, enumerates the
//! vertex-simple cycles of the remaining multigraph, filters each cycle
//! through the thread-distinctness, gatelock-disjointness and
//! happens-before predicates, and reports every survivor as a
//! [`DeadlockDiagnostic`] after deduplication.
//!
//! Everything here is deterministic for a given pair of graphs: vertices
//! are visited in ascending lock-id order and edges in insertion order.

use crate::core::diagnostic::{AcquireStreak, DeadlockDiagnostic};
use crate::core::event::CallStack;
use crate::core::graph::lock_graph::{LockGraph, LockGraphEdge};
use crate::core::graph::segmentation::SegmentationGraph;
use crate::core::types::{LockId, ThreadId};
use fxhash::{FxHashMap, FxHashSet};

/// Run the full analysis and collect the diagnostics.
pub fn analyze(lock_graph: &LockGraph, segmentation: &SegmentationGraph) -> Vec<DeadlockDiagnostic> {
    let mut diagnostics = Vec::new();
    analyze_with(lock_graph, segmentation, |d| diagnostics.push(d.clone()));
    diagnostics
}

/// Run the full analysis, handing each diagnostic to `visitor`.
pub fn analyze_with<F>(lock_graph: &LockGraph, segmentation: &SegmentationGraph, mut visitor: F)
where
    F: FnMut(&DeadlockDiagnostic),
{
    let analyzer = Analyzer::new(lock_graph, segmentation);
    for diagnostic in analyzer.run() {
        visitor(&diagnostic);
    }
}

/// One candidate diagnostic: the rendered streaks plus the acquisition
/// sites that produced them, kept so call-site-distinct findings survive
/// deduplication.
struct Candidate {
    streaks: Vec<AcquireStreak>,
    stacks: Vec<(CallStack, CallStack)>,
}

struct Analyzer<'a> {
    edges: Vec<&'a LockGraphEdge>,
    out: FxHashMap<LockId, Vec<usize>>,
    vertices: Vec<LockId>,
    segmentation: &'a SegmentationGraph,
}

impl<'a> Analyzer<'a> {
    /// Coalesce duplicate edges up front: repetitions of the same nesting
    /// by the same thread from the same call sites with the same held set
    /// add nothing to the cycle space.
    fn new(lock_graph: &'a LockGraph, segmentation: &'a SegmentationGraph) -> Self {
        let mut seen = FxHashSet::default();
        let mut edges: Vec<&LockGraphEdge> = Vec::new();
        let mut out: FxHashMap<LockId, Vec<usize>> = FxHashMap::default();

        for edge in lock_graph.edges() {
            let key = (
                edge.source,
                edge.target,
                edge.thread,
                edge.s1,
                edge.s2,
                &edge.held,
                &edge.stack1,
                &edge.stack2,
            );
            if seen.insert(key) {
                out.entry(edge.source).or_default().push(edges.len());
                edges.push(edge);
            }
        }

        Analyzer {
            edges,
            out,
            vertices: lock_graph.sorted_vertices(),
            segmentation,
        }
    }

    fn run(&self) -> Vec<DeadlockDiagnostic> {
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut seen = FxHashSet::default();

        for &root in &self.vertices {
            let mut path = Vec::new();
            let mut on_path = FxHashSet::default();
            self.cycles_from(root, root, &mut path, &mut on_path, &mut |cycle| {
                if !self.is_deadlock(cycle) {
                    return;
                }
                let candidate = self.explain(cycle);
                if seen.insert(canonical_key(&candidate)) {
                    candidates.push(candidate);
                }
            });
        }

        drop_fragments(candidates)
            .into_iter()
            .map(|c| DeadlockDiagnostic::new(c.streaks))
            .collect()
    }

    /// Depth-first enumeration of the vertex-simple cycles whose smallest
    /// vertex is `root`, Johnson style: only vertices >= root are entered,
    /// so every cycle is reported exactly once. Parallel edges yield
    /// distinct cycles.
    fn cycles_from(
        &self,
        root: LockId,
        vertex: LockId,
        path: &mut Vec<usize>,
        on_path: &mut FxHashSet<LockId>,
        report: &mut impl FnMut(&[usize]),
    ) {
        for &index in self.out.get(&vertex).map(Vec::as_slice).unwrap_or(&[]) {
            let target = self.edges[index].target;
            if target == root {
                path.push(index);
                report(path);
                path.pop();
            } else if target > root && !on_path.contains(&target) {
                path.push(index);
                on_path.insert(target);
                self.cycles_from(root, target, path, on_path, report);
                on_path.remove(&target);
                path.pop();
            }
        }
    }

    /// All three cycle predicates; any failure discards the cycle.
    fn is_deadlock(&self, cycle: &[usize]) -> bool {
        let edges: Vec<&LockGraphEdge> = cycle.iter().map(|&i| self.edges[i]).collect();

        let threads: FxHashSet<ThreadId> = edges.iter().map(|e| e.thread).collect();
        if threads.len() < 2 {
            return false;
        }

        for (i, a) in edges.iter().enumerate() {
            for b in &edges[i + 1..] {
                if a.thread == b.thread {
                    continue;
                }
                // a common gatelock serializes the two threads
                if a.gatelocks().iter().any(|g| b.gatelocks().contains(g)) {
                    return false;
                }
                // both directions: ordering in either one kills the cycle
                if self.segmentation.happens_before(a.s2, b.s1)
                    || self.segmentation.happens_before(b.s2, a.s1)
                {
                    return false;
                }
            }
        }
        true
    }

    /// Turn a surviving cycle into streaks: one per maximal run of
    /// consecutive same-thread edges, listing every lock the thread held
    /// during the run in acquisition order plus the lock it finally
    /// waited for.
    fn explain(&self, cycle: &[usize]) -> Candidate {
        let edges: Vec<&LockGraphEdge> = cycle.iter().map(|&i| self.edges[i]).collect();
        let n = edges.len();

        // rotate so the cycle opens on a thread boundary
        let start = (0..n)
            .find(|&i| edges[(i + n - 1) % n].thread != edges[i].thread)
            .unwrap_or(0);

        let mut streaks = Vec::new();
        let mut stacks = Vec::new();
        let mut i = 0;
        while i < n {
            let first = &edges[(start + i) % n];
            let mut last = first;
            let mut held: Vec<LockId> = Vec::new();
            let mut push_unique = |held: &mut Vec<LockId>, lock: LockId| {
                if !held.contains(&lock) {
                    held.push(lock);
                }
            };
            let mut j = i;
            while j < n {
                let edge = &edges[(start + j) % n];
                if edge.thread != first.thread {
                    break;
                }
                for &lock in &edge.held {
                    push_unique(&mut held, lock);
                }
                last = edge;
                j += 1;
            }
            push_unique(&mut held, last.target);

            streaks.push(AcquireStreak::new(first.thread, held));
            stacks.push((first.stack1.clone(), last.stack2.clone()));
            i = j;
        }

        Candidate { streaks, stacks }
    }
}

type StreakKey = (ThreadId, Vec<LockId>, CallStack, CallStack);

/// Rotation-independent identity of a candidate, acquisition sites
/// included: the same deadlock found through its direct and its
/// transitively-closed edges collapses, while the same locking pattern
/// reached from two different functions stays distinct.
fn canonical_key(candidate: &Candidate) -> Vec<StreakKey> {
    let keys: Vec<StreakKey> = candidate
        .streaks
        .iter()
        .zip(&candidate.stacks)
        .map(|(streak, (stack1, stack2))| {
            (
                streak.thread,
                streak.locks.clone(),
                stack1.clone(),
                stack2.clone(),
            )
        })
        .collect();

    let n = keys.len();
    (0..n)
        .map(|r| {
            let mut rotated = keys.clone();
            rotated.rotate_left(r);
            rotated
        })
        .min()
        .expect("cycles always have at least one streak")
}

/// Whether `small` appears in `big` in order (not necessarily
/// contiguously).
fn is_subsequence(small: &[LockId], big: &[LockId]) -> bool {
    let mut it = big.iter();
    small.iter().all(|lock| it.any(|b| b == lock))
}

/// Drop candidates that are fragments of a larger surviving deadlock:
/// same threads in the same cyclic order, every streak an order-preserving
/// subsequence of the larger one's, at least one strictly smaller. Those
/// arise when a cycle threads through a subset of the locks another cycle
/// already explains.
fn drop_fragments(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let kept: Vec<bool> = candidates
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            !candidates
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && subsumes(other, candidate))
        })
        .collect();

    candidates
        .into_iter()
        .zip(kept)
        .filter_map(|(c, keep)| keep.then_some(c))
        .collect()
}

/// Whether `small` is a proper fragment of `big`, stacks ignored.
fn subsumes(big: &Candidate, small: &Candidate) -> bool {
    let n = small.streaks.len();
    if n != big.streaks.len() {
        return false;
    }

    'rotation: for r in 0..n {
        let mut strictly_smaller = false;
        for i in 0..n {
            let s = &small.streaks[(i + r) % n];
            let b = &big.streaks[i];
            if s.thread != b.thread || !is_subsequence(&s.locks, &b.locks) {
                continue 'rotation;
            }
            if s.locks.len() < b.locks.len() {
                strictly_smaller = true;
            }
        }
        if strictly_smaller {
            return true;
        }
    }
    false
}
