//! Partitioned dataset abstraction backing the training loop.
//!
//! The training core only ever talks to data through [`ParallelDataset`],
//! a small set of map/shuffle/reduce primitives over partitioned vectors.
//! This keeps the histogram engine and split finder independent of the
//! execution substrate: here the substrate is in-memory partitions with
//! rayon doing per-partition work, but the same contract can be backed by
//! a cluster shuffle engine.
//!
//! # Module Organization
//!
//! - [`dataset`] - [`ParallelDataset`] and its operations
//! - [`checkpoint`] - [`Checkpointer`] lineage-truncation helper
//! - [`partitioner`] - [`RangePartitioner`] for sorted key ranges

pub mod checkpoint;
pub mod dataset;
pub mod partitioner;

pub use checkpoint::Checkpointer;
pub use dataset::ParallelDataset;
pub use partitioner::RangePartitioner;
