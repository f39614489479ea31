//! Feature discretization: raw columns to small integer bins.
//!
//! A [`Discretizer`] is fitted once per training run. Each column gets one
//! [`ColAgg`] summarizer chosen by its category (categorical set, rank set,
//! otherwise numerical per [`BinKind`]); the aggregators are folded over
//! the dataset with a tree aggregation and finalized into per-column
//! [`ColDiscretizer`] mappings.
//!
//! Bin 0 is reserved for missing values and is produced only here: a raw
//! NaN or infinite cell maps to 0 before the column mapping is consulted.
//!
//! # Module Organization
//!
//! - [`agg`] - per-column aggregators
//! - [`col`] - fitted per-column bin mappings
//! - [`quantile`] - the Greenwald-Khanna sketch behind depth binning
//! - [`io`] - the persisted row layout

pub mod agg;
pub mod col;
pub mod io;
pub mod quantile;

pub use agg::ColAgg;
pub use col::{BinId, ColDiscretizer};
pub use io::DiscretizerRow;

use crate::config::BinKind;
use crate::data::ParallelDataset;
use crate::error::{HistBoostError, Result};

// ============================================================================
// Discretizer
// ============================================================================

/// Fitted per-column bin mappings for a whole dataset. Immutable after fit.
#[derive(Clone, Debug, PartialEq)]
pub struct Discretizer {
    cols: Vec<ColDiscretizer>,
}

/// Aggregation state folded over the dataset during fit.
///
/// Cardinality overflow inside a partition or merge poisons the state; the
/// first failure wins and surfaces after the fold completes.
#[derive(Clone, Debug)]
enum FitState {
    Active(Vec<ColAgg>),
    Failed { feature: usize, max_bins: usize },
}

impl Discretizer {
    /// Fit bin mappings over every column of `data`.
    ///
    /// `cat_cols` and `rank_cols` select categorical and rank columns by
    /// index; they must be disjoint and in range. Remaining columns are
    /// numerical and binned per `bin_kind`. `aggregation_depth` bounds the
    /// fan-in of the aggregator combine tree.
    pub fn fit(
        data: &ParallelDataset<Vec<f64>>,
        num_cols: usize,
        cat_cols: &[usize],
        rank_cols: &[usize],
        max_bins: usize,
        bin_kind: BinKind,
        aggregation_depth: usize,
    ) -> Result<Self> {
        if max_bins < 4 {
            return Err(HistBoostError::Config(format!(
                "discretizer fit requires max_bins >= 4, got {max_bins}"
            )));
        }
        for &c in cat_cols.iter().chain(rank_cols) {
            if c >= num_cols {
                return Err(HistBoostError::Config(format!(
                    "column index {c} out of range for {num_cols} columns"
                )));
            }
        }
        if cat_cols.iter().any(|c| rank_cols.contains(c)) {
            return Err(HistBoostError::Config(
                "cat_cols and rank_cols must be disjoint".to_string(),
            ));
        }

        let initial: Vec<ColAgg> = (0..num_cols)
            .map(|i| {
                if cat_cols.contains(&i) {
                    ColAgg::cat(i, max_bins)
                } else if rank_cols.contains(&i) {
                    ColAgg::rank(i, max_bins)
                } else {
                    match bin_kind {
                        BinKind::Depth => ColAgg::quantile(i, max_bins),
                        BinKind::Width => ColAgg::interval(i, max_bins),
                    }
                }
            })
            .collect();

        let state = data.tree_aggregate(
            FitState::Active(initial),
            fit_seq_op,
            fit_comb_op,
            aggregation_depth,
        );

        match state {
            FitState::Active(aggs) => Ok(Self {
                cols: aggs.into_iter().map(ColAgg::into_discretizer).collect(),
            }),
            FitState::Failed { feature, max_bins } => {
                Err(HistBoostError::CardinalityOverflow { feature, max_bins })
            }
        }
    }

    /// Build directly from fitted column mappings.
    pub fn from_cols(cols: Vec<ColDiscretizer>) -> Self {
        Self { cols }
    }

    /// Fitted column mappings.
    #[inline]
    pub fn cols(&self) -> &[ColDiscretizer] {
        &self.cols
    }

    /// Number of columns.
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.cols.len()
    }

    /// Map a raw vector to bin ids: missing cells (NaN or infinite) map to
    /// bin 0, everything else goes through the column mapping.
    pub fn transform(&self, vec: &[f64]) -> Result<Vec<BinId>> {
        assert_eq!(vec.len(), self.cols.len(), "vector width mismatch");
        self.cols
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let v = vec[i];
                if v.is_finite() {
                    col.transform(i, v)
                } else {
                    Ok(0)
                }
            })
            .collect()
    }

    /// Bins per column, including the reserved missing bin.
    pub fn num_bins(&self) -> Vec<usize> {
        self.cols.iter().map(|c| c.num_bins() + 1).collect()
    }

    /// Per column: true when splits over it are ordered threshold cuts
    /// (numerical and rank columns), false for categorical subset splits.
    pub fn is_seq(&self) -> Vec<bool> {
        self.cols
            .iter()
            .map(|c| !matches!(c, ColDiscretizer::Categorical { .. }))
            .collect()
    }
}

fn fit_seq_op(state: FitState, vec: &Vec<f64>) -> FitState {
    let mut aggs = match state {
        FitState::Active(aggs) => aggs,
        failed => return failed,
    };
    debug_assert_eq!(vec.len(), aggs.len(), "vector width mismatch");
    for (i, agg) in aggs.iter_mut().enumerate() {
        let v = vec[i];
        if !v.is_finite() {
            continue;
        }
        if let Err(err) = agg.update(v) {
            return failed_from(&err);
        }
    }
    FitState::Active(aggs)
}

fn fit_comb_op(a: FitState, b: FitState) -> FitState {
    let lhs = match a {
        FitState::Active(aggs) => aggs,
        failed => return failed,
    };
    let rhs = match b {
        FitState::Active(aggs) => aggs,
        failed => return failed,
    };
    let mut merged = Vec::with_capacity(lhs.len());
    for (x, y) in lhs.into_iter().zip(rhs) {
        match x.merge(y) {
            Ok(m) => merged.push(m),
            Err(err) => return failed_from(&err),
        }
    }
    FitState::Active(merged)
}

fn failed_from(err: &HistBoostError) -> FitState {
    match err {
        HistBoostError::CardinalityOverflow { feature, max_bins } => {
            FitState::Failed { feature: *feature, max_bins: *max_bins }
        }
        other => unreachable!("aggregators only fail on cardinality overflow: {other}"),
    }
}

// ============================================================================
// Tests
// ============================================================================
