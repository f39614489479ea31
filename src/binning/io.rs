//! Persisted row layout for fitted discretizers.
//!
//! One [`DiscretizerRow`] per column, serializable into any columnar
//! container. The row carries the column index, the mapping kind, and the
//! kind-specific payload split into a doubles array and an ints array.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::col::{BinId, ColDiscretizer};
use super::Discretizer;
use crate::error::{HistBoostError, Result};

// ============================================================================
// Row layout
// ============================================================================

/// Discretizer kind tag as persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Quantile,
    Interval,
    Cat,
    Rank,
}

/// One persisted column mapping.
///
/// Payload encoding per kind:
/// - `quantile`: `doubles` = sorted splits, `ints` empty;
/// - `interval`: `doubles` = `[start, step]`, `ints` = `[num_bins]`;
/// - `cat`: `ints` = category values ordered by their assigned bin;
/// - `rank`: `ints` = sorted values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscretizerRow {
    pub feature_index: i32,
    pub kind: RowKind,
    pub doubles: Vec<f64>,
    pub ints: Vec<i64>,
}

impl Discretizer {
    /// Encode every column mapping as a persisted row.
    pub fn to_rows(&self) -> Vec<DiscretizerRow> {
        self.cols()
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let feature_index = i as i32;
                match col {
                    ColDiscretizer::Quantile { splits } => DiscretizerRow {
                        feature_index,
                        kind: RowKind::Quantile,
                        doubles: splits.clone(),
                        ints: vec![],
                    },
                    ColDiscretizer::Interval { start, step, num_bins } => DiscretizerRow {
                        feature_index,
                        kind: RowKind::Interval,
                        doubles: vec![*start, *step],
                        ints: vec![*num_bins as i64],
                    },
                    ColDiscretizer::Categorical { map } => {
                        // Categories listed in bin order: position j holds the
                        // category assigned bin j + 1.
                        let mut by_bin = vec![0i64; map.len()];
                        for (&cat, &bin) in map {
                            by_bin[bin as usize - 1] = cat;
                        }
                        DiscretizerRow {
                            feature_index,
                            kind: RowKind::Cat,
                            doubles: vec![],
                            ints: by_bin,
                        }
                    }
                    ColDiscretizer::Rank { values } => DiscretizerRow {
                        feature_index,
                        kind: RowKind::Rank,
                        doubles: vec![],
                        ints: values.clone(),
                    },
                }
            })
            .collect()
    }

    /// Rebuild a discretizer from persisted rows.
    ///
    /// Rows may arrive in any order; `feature_index` values must form the
    /// contiguous range `[0, N-1]` with no duplicates.
    pub fn from_rows(mut rows: Vec<DiscretizerRow>) -> Result<Self> {
        rows.sort_by_key(|r| r.feature_index);
        for (expect, row) in rows.iter().enumerate() {
            if row.feature_index != expect as i32 {
                return Err(HistBoostError::Discretizer(format!(
                    "feature indexes must cover [0, {}) exactly, found {}",
                    rows.len(),
                    row.feature_index
                )));
            }
        }

        let cols = rows
            .into_iter()
            .map(|row| match row.kind {
                RowKind::Quantile => Ok(ColDiscretizer::Quantile { splits: row.doubles }),
                RowKind::Interval => {
                    if row.doubles.len() != 2 || row.ints.len() != 1 || row.ints[0] < 1 {
                        return Err(HistBoostError::Discretizer(format!(
                            "malformed interval row for feature {}",
                            row.feature_index
                        )));
                    }
                    Ok(ColDiscretizer::Interval {
                        start: row.doubles[0],
                        step: row.doubles[1],
                        num_bins: row.ints[0] as usize,
                    })
                }
                RowKind::Cat => {
                    let map: HashMap<i64, BinId> = row
                        .ints
                        .iter()
                        .enumerate()
                        .map(|(j, &cat)| (cat, j as BinId + 1))
                        .collect();
                    if map.len() != row.ints.len() {
                        return Err(HistBoostError::Discretizer(format!(
                            "duplicate category in row for feature {}",
                            row.feature_index
                        )));
                    }
                    Ok(ColDiscretizer::Categorical { map })
                }
                RowKind::Rank => {
                    if row.ints.windows(2).any(|w| w[0] >= w[1]) {
                        return Err(HistBoostError::Discretizer(format!(
                            "rank values must be strictly increasing for feature {}",
                            row.feature_index
                        )));
                    }
                    Ok(ColDiscretizer::Rank { values: row.ints })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Discretizer::from_cols(cols))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_discretizer() -> Discretizer {
        let map: HashMap<i64, BinId> = [(7, 1), (3, 2), (9, 3)].into_iter().collect();
        Discretizer::from_cols(vec![
            ColDiscretizer::Quantile { splits: vec![0.5, 1.5, 2.5] },
            ColDiscretizer::Interval { start: 1.0, step: 2.0, num_bins: 6 },
            ColDiscretizer::Categorical { map },
            ColDiscretizer::Rank { values: vec![-4, 0, 12] },
        ])
    }

    #[test]
    fn test_round_trip_all_variants() {
        let d = sample_discretizer();
        let restored = Discretizer::from_rows(d.to_rows()).unwrap();
        assert_eq!(restored, d);
    }

    #[test]
    fn test_rows_survive_json() {
        let d = sample_discretizer();
        let json = serde_json::to_string(&d.to_rows()).unwrap();
        let rows: Vec<DiscretizerRow> = serde_json::from_str(&json).unwrap();
        assert_eq!(Discretizer::from_rows(rows).unwrap(), d);
    }

    #[test]
    fn test_cat_row_lists_categories_in_bin_order() {
        let d = sample_discretizer();
        let rows = d.to_rows();
        assert_eq!(rows[2].kind, RowKind::Cat);
        assert_eq!(rows[2].ints, vec![7, 3, 9]);
    }

    #[test]
    fn test_rows_accept_shuffled_order() {
        let mut rows = sample_discretizer().to_rows();
        rows.reverse();
        let restored = Discretizer::from_rows(rows).unwrap();
        assert_eq!(restored, sample_discretizer());
    }

    #[test]
    fn test_rows_reject_gaps_and_duplicates() {
        let mut rows = sample_discretizer().to_rows();
        rows[1].feature_index = 9;
        assert!(Discretizer::from_rows(rows).is_err());

        let mut rows = sample_discretizer().to_rows();
        rows[1].feature_index = 0;
        assert!(Discretizer::from_rows(rows).is_err());
    }

    #[test]
    fn test_rows_reject_malformed_interval() {
        let rows = vec![DiscretizerRow {
            feature_index: 0,
            kind: RowKind::Interval,
            doubles: vec![1.0],
            ints: vec![4],
        }];
        assert!(Discretizer::from_rows(rows).is_err());
    }
}
