//! Histogram-based tree training.
//!
//! The per-tree loop lives in [`grower`]: each level recomputes per-instance
//! node ids, builds per-(node, feature) histograms (direct at the root,
//! left-children-plus-subtraction below it), and asks the split finder for
//! the best split per frontier leaf.
//!
//! # Module Organization
//!
//! - [`histograms`] - histogram building, subtraction, pruning
//! - [`split`] - split types and per-histogram search
//! - [`splitter`] - column sampling and per-node split selection
//! - [`grower`] - the frontier growth loop

pub mod grower;
pub mod histograms;
pub mod split;
pub mod splitter;

pub use grower::{LearningNode, TreeGrower};
pub use histograms::{compute_hists, compute_parallelism, subtract_hists, HistVal};
pub use split::Split;
pub use splitter::find_splits;

use serde::{Deserialize, Serialize};

use crate::binning::BinId;

/// One discretized training instance: the loss gradient pair at the current
/// prediction plus the instance's bin per selected column.
///
/// Bins are immutable for the whole training run; gradients are refreshed
/// by the boosting driver between trees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance<H> {
    pub grad: H,
    pub hess: H,
    pub bins: Vec<BinId>,
}

impl<H> Instance<H> {
    /// Bundle a gradient pair with its bin vector.
    pub fn new(grad: H, hess: H, bins: Vec<BinId>) -> Self {
        Self { grad, hess, bins }
    }
}
