//! Training configuration.
//!
//! [`BoostConfig`] holds the run-level knobs shared by every tree
//! (regularization, growth limits, checkpointing), while [`TreeConfig`]
//! carries the per-tree state the split finder needs (column selection and
//! per-column split strategy).
//!
//! # Example
//!
//! ```
//! use histboost::config::BoostConfig;
//!
//! let config = BoostConfig::builder()
//!     .max_depth(6)
//!     .max_leaves(64u64)
//!     .reg_lambda(1.0)
//!     .build()
//!     .unwrap();
//! config.validate().unwrap();
//! ```

use std::path::PathBuf;

use derive_builder::Builder;

use crate::error::{HistBoostError, Result};

// ============================================================================
// BinKind
// ============================================================================

/// How numerical columns are discretized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BinKind {
    /// Equal-frequency bins from an approximate quantile summary.
    #[default]
    Depth,
    /// Equal-width bins over the observed [min, max] range.
    Width,
}

// ============================================================================
// StorageLevel
// ============================================================================

/// Storage level requested when persisting intermediate datasets.
///
/// The in-memory execution backend keeps every materialized dataset in
/// memory; the level is recorded so an external shuffle engine can honor it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageLevel {
    /// Keep partitions in memory only.
    #[default]
    Memory,
    /// Keep partitions in memory, spill to disk under pressure.
    MemoryAndDisk,
}

// ============================================================================
// BoostConfig
// ============================================================================

/// Run-level training configuration.
///
/// Use [`BoostConfig::builder()`] for a fluent API or
/// [`BoostConfig::default()`] for sensible defaults. Call
/// [`BoostConfig::validate`] before training; invalid parameters fail fast.
#[derive(Clone, Debug, Builder)]
#[builder(setter(into), default)]
pub struct BoostConfig {
    /// Maximum tree depth (root has depth 1).
    #[builder(default = "5")]
    pub max_depth: i32,

    /// Maximum number of leaves per tree.
    #[builder(default = "31")]
    pub max_leaves: u64,

    /// Minimum gain required to keep a split.
    #[builder(default = "0.0")]
    pub min_gain: f64,

    /// Minimum sum of hessians required on each side of a split.
    #[builder(default = "1.0")]
    pub min_node_hess: f64,

    /// L1 regularization (alpha).
    #[builder(default = "0.0")]
    pub reg_alpha: f64,

    /// L2 regularization (lambda).
    #[builder(default = "1.0")]
    pub reg_lambda: f64,

    /// Fraction of columns considered at each depth level, in (0, 1].
    #[builder(default = "1.0")]
    pub col_sample_by_level: f64,

    /// Largest nonzero-bin count for which categorical splits are found by
    /// exhaustive subset enumeration; above it the sorted heuristic is used.
    #[builder(default = "10")]
    pub max_brute_bins: i32,

    /// Fan-in depth for tree-shaped reductions.
    #[builder(default = "2")]
    pub aggregation_depth: i32,

    /// Maximum bins per column, including the reserved missing bin.
    #[builder(default = "64")]
    pub max_bins: usize,

    /// How numerical columns are binned.
    #[builder(default)]
    pub bin_kind: BinKind,

    /// Storage level for persisted intermediate datasets.
    #[builder(default)]
    pub storage_level: StorageLevel,

    /// Checkpoint every this many checkpointer updates; -1 disables.
    #[builder(default = "-1")]
    pub checkpoint_interval: i32,

    /// Directory for checkpoint files. Checkpointing is skipped when unset.
    #[builder(default)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Base seed for column sampling.
    #[builder(default = "42")]
    pub seed: i64,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_leaves: 31,
            min_gain: 0.0,
            min_node_hess: 1.0,
            reg_alpha: 0.0,
            reg_lambda: 1.0,
            col_sample_by_level: 1.0,
            max_brute_bins: 10,
            aggregation_depth: 2,
            max_bins: 64,
            bin_kind: BinKind::default(),
            storage_level: StorageLevel::default(),
            checkpoint_interval: -1,
            checkpoint_dir: None,
            seed: 42,
        }
    }
}

impl BoostConfig {
    /// Create a builder with default values.
    pub fn builder() -> BoostConfigBuilder {
        BoostConfigBuilder::default()
    }

    /// Check every parameter range, failing fast on the first violation.
    pub fn validate(&self) -> Result<()> {
        fn fail(msg: String) -> Result<()> {
            Err(HistBoostError::Config(msg))
        }

        if self.max_depth < 1 {
            return fail(format!("max_depth must be >= 1, got {}", self.max_depth));
        }
        if self.max_leaves < 2 {
            return fail(format!("max_leaves must be >= 2, got {}", self.max_leaves));
        }
        if !(self.min_gain >= 0.0) {
            return fail(format!("min_gain must be >= 0, got {}", self.min_gain));
        }
        if !(self.min_node_hess >= 0.0) {
            return fail(format!("min_node_hess must be >= 0, got {}", self.min_node_hess));
        }
        if !(self.reg_alpha >= 0.0) {
            return fail(format!("reg_alpha must be >= 0, got {}", self.reg_alpha));
        }
        if !(self.reg_lambda >= 0.0) {
            return fail(format!("reg_lambda must be >= 0, got {}", self.reg_lambda));
        }
        if !(self.col_sample_by_level > 0.0 && self.col_sample_by_level <= 1.0) {
            return fail(format!(
                "col_sample_by_level must be in (0, 1], got {}",
                self.col_sample_by_level
            ));
        }
        if self.max_brute_bins < 2 {
            return fail(format!("max_brute_bins must be >= 2, got {}", self.max_brute_bins));
        }
        if self.aggregation_depth < 2 {
            return fail(format!(
                "aggregation_depth must be >= 2, got {}",
                self.aggregation_depth
            ));
        }
        if self.max_bins < 4 {
            return fail(format!("max_bins must be >= 4, got {}", self.max_bins));
        }
        Ok(())
    }
}

// ============================================================================
// TreeConfig
// ============================================================================

/// Per-tree configuration handed to the split finder and grower.
#[derive(Clone, Debug)]
pub struct TreeConfig {
    /// Boosting iteration this tree belongs to.
    pub iteration: u32,
    /// Index of this tree within the iteration.
    pub tree_index: u32,
    /// Selected column index -> original column id.
    pub columns: Vec<u32>,
    /// Number of selected columns.
    pub num_cols: usize,
    /// Per selected column: true for sequential (numerical/rank) splits,
    /// false for set (categorical) splits.
    pub is_seq: Vec<bool>,
}

impl TreeConfig {
    /// Configuration covering all columns of a discretized dataset.
    pub fn new(iteration: u32, tree_index: u32, columns: Vec<u32>, is_seq: Vec<bool>) -> Self {
        assert_eq!(columns.len(), is_seq.len(), "columns and is_seq must align");
        let num_cols = columns.len();
        Self { iteration, tree_index, columns, num_cols, is_seq }
    }

    /// Whether the given selected column uses sequential split search.
    #[inline]
    pub fn is_seq(&self, col: usize) -> bool {
        self.is_seq[col]
    }

    /// Original column id for a selected column.
    #[inline]
    pub fn original_column(&self, col: usize) -> u32 {
        self.columns[col]
    }
}

// ============================================================================
// Tests
// ============================================================================
