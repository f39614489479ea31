//! Per-column bin mappings.
//!
//! A fitted [`ColDiscretizer`] maps one raw column value to a bin id in
//! `[1, num_bins]`. Bin 0 is never produced here: the dataset-level
//! [`Discretizer`](super::Discretizer) reserves it for missing values
//! before delegating.

use std::collections::HashMap;

use crate::error::{HistBoostError, Result};

/// Bin index within a column. `0` is reserved for missing values.
pub type BinId = u32;

// ============================================================================
// ColDiscretizer
// ============================================================================

/// Mapping from one column's raw values to bin ids.
#[derive(Clone, Debug, PartialEq)]
pub enum ColDiscretizer {
    /// Ordered bins delimited by sorted quantile split points.
    Quantile {
        /// Sorted, deduplicated split values.
        splits: Vec<f64>,
    },
    /// Equal-width bins over a fitted range.
    Interval {
        /// Center of the first interior bin boundary.
        start: f64,
        /// Bin width; `0` collapses to a single bin.
        step: f64,
        /// Total bins emitted.
        num_bins: usize,
    },
    /// Unordered categories ranked by training-set frequency.
    Categorical {
        /// Category value -> bin id in `[1, map.len()]`.
        map: HashMap<i64, BinId>,
    },
    /// Ordered integer values mapped by position.
    Rank {
        /// Sorted ascending distinct values.
        values: Vec<i64>,
    },
}

impl ColDiscretizer {
    /// Bins this column can produce, not counting the reserved missing bin.
    pub fn num_bins(&self) -> usize {
        match self {
            Self::Quantile { splits } => splits.len() + 1,
            Self::Interval { num_bins, .. } => *num_bins,
            Self::Categorical { map } => map.len(),
            Self::Rank { values } => values.len(),
        }
    }

    /// Map a non-missing value to its bin.
    ///
    /// `col` is only used to label errors. Quantile and interval mappings
    /// are total over finite inputs; categorical and rank mappings fail on
    /// values never seen during fit.
    pub fn transform(&self, col: usize, value: f64) -> Result<BinId> {
        match self {
            Self::Quantile { splits } => {
                // 1 + number of splits strictly below the value, which also
                // clamps the result into [1, splits.len() + 1].
                Ok(1 + splits.partition_point(|s| *s < value) as BinId)
            }
            Self::Interval { start, step, num_bins } => {
                if *step == 0.0 {
                    return Ok(1);
                }
                let raw = ((value - start) / step).floor() as i64 + 2;
                Ok(raw.clamp(1, *num_bins as i64) as BinId)
            }
            Self::Categorical { map } => {
                let key = value as i64;
                map.get(&key)
                    .copied()
                    .ok_or(HistBoostError::UnknownCategory { feature: col, value: key })
            }
            Self::Rank { values } => {
                let key = value as i64;
                match values.binary_search(&key) {
                    Ok(idx) => Ok(1 + idx as BinId),
                    Err(_) => Err(HistBoostError::UnknownValue { feature: col, value: key }),
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
