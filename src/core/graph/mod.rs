//! Derived graph structures: the lock graph and the segmentation graph.

pub mod lock_graph;
pub mod segmentation;

pub use lock_graph::{LockGraph, LockGraphBuilder, LockGraphEdge};
pub use segmentation::{SegmentationGraph, SegmentationGraphBuilder};
