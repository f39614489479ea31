//! Per-column aggregators used while fitting bin mappings.
//!
//! One [`ColAgg`] summarizes one raw column across the dataset: numerical
//! columns keep either a quantile sketch or a running range, categorical
//! columns count values, rank columns collect a value set. Aggregators are
//! folded per partition and merged pairwise; none of them ever sees a
//! missing value (the dataset layer filters NaN/infinity first).

use std::collections::{BTreeSet, HashMap};

use super::col::{BinId, ColDiscretizer};
use super::quantile::QuantileSummary;
use crate::error::{HistBoostError, Result};

// ============================================================================
// ColAgg
// ============================================================================

/// Column summarizer, one variant per discretizer kind.
#[derive(Clone, Debug)]
pub enum ColAgg {
    /// Approximate quantile summary for equal-frequency binning.
    Quantile {
        col: usize,
        max_bins: usize,
        summary: QuantileSummary,
    },
    /// Running range for equal-width binning.
    Interval {
        col: usize,
        max_bins: usize,
        min: f64,
        max: f64,
    },
    /// Value counts plus first-seen order for frequency ranking.
    Cat {
        col: usize,
        max_bins: usize,
        counts: HashMap<i64, u64>,
        seen_order: Vec<i64>,
    },
    /// Distinct value set for rank binning.
    Rank {
        col: usize,
        max_bins: usize,
        values: BTreeSet<i64>,
    },
}

impl ColAgg {
    /// Quantile aggregator for column `col`.
    pub fn quantile(col: usize, max_bins: usize) -> Self {
        assert!(max_bins >= 2, "max_bins must be >= 2");
        Self::Quantile { col, max_bins, summary: QuantileSummary::default() }
    }

    /// Interval aggregator for column `col`.
    ///
    /// The inverted min/max initialization makes the `max > min` range
    /// check fail for an all-missing column, which then degenerates to a
    /// single bin.
    pub fn interval(col: usize, max_bins: usize) -> Self {
        assert!(max_bins >= 2, "max_bins must be >= 2");
        Self::Interval { col, max_bins, min: f64::MAX, max: f64::MIN }
    }

    /// Categorical aggregator for column `col`.
    pub fn cat(col: usize, max_bins: usize) -> Self {
        assert!(max_bins >= 2, "max_bins must be >= 2");
        Self::Cat { col, max_bins, counts: HashMap::new(), seen_order: Vec::new() }
    }

    /// Rank aggregator for column `col`.
    pub fn rank(col: usize, max_bins: usize) -> Self {
        assert!(max_bins >= 2, "max_bins must be >= 2");
        Self::Rank { col, max_bins, values: BTreeSet::new() }
    }

    /// Column this aggregator summarizes.
    pub fn col(&self) -> usize {
        match self {
            Self::Quantile { col, .. }
            | Self::Interval { col, .. }
            | Self::Cat { col, .. }
            | Self::Rank { col, .. } => *col,
        }
    }

    /// Fold one non-missing value into the summary.
    ///
    /// Categorical and rank aggregators reject the update that would push
    /// their cardinality past `max_bins`.
    pub fn update(&mut self, value: f64) -> Result<()> {
        match self {
            Self::Quantile { summary, .. } => {
                summary.insert(value);
                Ok(())
            }
            Self::Interval { min, max, .. } => {
                *min = min.min(value);
                *max = max.max(value);
                Ok(())
            }
            Self::Cat { col, max_bins, counts, seen_order } => {
                let key = value as i64;
                if let Some(n) = counts.get_mut(&key) {
                    *n += 1;
                    return Ok(());
                }
                if counts.len() >= *max_bins {
                    return Err(HistBoostError::CardinalityOverflow {
                        feature: *col,
                        max_bins: *max_bins,
                    });
                }
                counts.insert(key, 1);
                seen_order.push(key);
                Ok(())
            }
            Self::Rank { col, max_bins, values } => {
                let key = value as i64;
                if values.contains(&key) {
                    return Ok(());
                }
                if values.len() >= *max_bins {
                    return Err(HistBoostError::CardinalityOverflow {
                        feature: *col,
                        max_bins: *max_bins,
                    });
                }
                values.insert(key);
                Ok(())
            }
        }
    }

    /// Merge two aggregators for the same column and kind.
    ///
    /// # Panics
    ///
    /// Panics when the variants or columns differ; aggregators are only
    /// merged with their per-partition counterparts.
    pub fn merge(self, other: ColAgg) -> Result<ColAgg> {
        match (self, other) {
            (
                Self::Quantile { col, max_bins, summary },
                Self::Quantile { col: oc, summary: os, .. },
            ) => {
                assert_eq!(col, oc, "merging aggregators of different columns");
                Ok(Self::Quantile { col, max_bins, summary: summary.merge(os) })
            }
            (
                Self::Interval { col, max_bins, min, max },
                Self::Interval { col: oc, min: omin, max: omax, .. },
            ) => {
                assert_eq!(col, oc, "merging aggregators of different columns");
                Ok(Self::Interval { col, max_bins, min: min.min(omin), max: max.max(omax) })
            }
            (
                Self::Cat { col, max_bins, mut counts, mut seen_order },
                Self::Cat { col: oc, counts: ocounts, seen_order: oorder, .. },
            ) => {
                assert_eq!(col, oc, "merging aggregators of different columns");
                for key in oorder {
                    let n = ocounts[&key];
                    if let Some(existing) = counts.get_mut(&key) {
                        *existing += n;
                        continue;
                    }
                    if counts.len() >= max_bins {
                        return Err(HistBoostError::CardinalityOverflow {
                            feature: col,
                            max_bins,
                        });
                    }
                    counts.insert(key, n);
                    seen_order.push(key);
                }
                Ok(Self::Cat { col, max_bins, counts, seen_order })
            }
            (
                Self::Rank { col, max_bins, mut values },
                Self::Rank { col: oc, values: ovalues, .. },
            ) => {
                assert_eq!(col, oc, "merging aggregators of different columns");
                for key in ovalues {
                    values.insert(key);
                    if values.len() > max_bins {
                        return Err(HistBoostError::CardinalityOverflow {
                            feature: col,
                            max_bins,
                        });
                    }
                }
                Ok(Self::Rank { col, max_bins, values })
            }
            _ => panic!("merging aggregators of different kinds"),
        }
    }

    /// Finalize into the fitted column discretizer.
    pub fn into_discretizer(self) -> ColDiscretizer {
        match self {
            Self::Quantile { max_bins, mut summary, .. } => {
                if summary.count() == 0 {
                    return ColDiscretizer::Quantile { splits: vec![] };
                }
                let mut splits = Vec::with_capacity(max_bins - 1);
                for i in 0..max_bins - 1 {
                    let q = (i as f64 + 0.5) / max_bins as f64;
                    if let Some(v) = summary.query(q) {
                        splits.push(v);
                    }
                }
                splits.sort_unstable_by(|a, b| a.total_cmp(b));
                splits.dedup();
                ColDiscretizer::Quantile { splits }
            }
            Self::Interval { max_bins, min, max, .. } => {
                if max > min {
                    let step = (max - min) / (max_bins - 1) as f64;
                    ColDiscretizer::Interval {
                        start: min + step / 2.0,
                        step,
                        num_bins: max_bins,
                    }
                } else {
                    ColDiscretizer::Interval { start: 0.0, step: 0.0, num_bins: 1 }
                }
            }
            Self::Cat { counts, seen_order, .. } => {
                // Frequency-descending rank; first-seen order breaks ties.
                let mut ranked: Vec<(usize, i64)> = seen_order.into_iter().enumerate().collect();
                ranked.sort_by_key(|&(first_seen, key)| {
                    (std::cmp::Reverse(counts[&key]), first_seen)
                });
                let map = ranked
                    .into_iter()
                    .enumerate()
                    .map(|(rank, (_, key))| (key, rank as BinId + 1))
                    .collect();
                ColDiscretizer::Categorical { map }
            }
            Self::Rank { values, .. } => {
                ColDiscretizer::Rank { values: values.into_iter().collect() }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_agg_depth_bins() {
        // Eight evenly spread values, four bins: splits near the
        // 0.125/0.375/0.625/0.875 quantiles separate 1..8 into 1..4.
        let mut agg = ColAgg::quantile(0, 4);
        for v in 1..=8 {
            agg.update(v as f64).unwrap();
        }
        let d = agg.into_discretizer();
        assert!(d.num_bins() <= 4 && d.num_bins() >= 2);
        let lo = d.transform(0, 1.0).unwrap();
        let hi = d.transform(0, 8.0).unwrap();
        assert!(lo < hi);
        let mid = d.transform(0, 4.5).unwrap();
        assert!(mid == 2 || mid == 3, "mid-range value landed in bin {mid}");
    }

    #[test]
    fn test_quantile_agg_empty() {
        let agg = ColAgg::quantile(0, 8);
        let d = agg.into_discretizer();
        assert_eq!(d, ColDiscretizer::Quantile { splits: vec![] });
        assert_eq!(d.transform(0, 123.0).unwrap(), 1);
    }

    #[test]
    fn test_interval_agg_range() {
        let mut agg = ColAgg::interval(0, 11);
        for v in [0.0, 2.0, 10.0, 5.0] {
            agg.update(v).unwrap();
        }
        let d = agg.into_discretizer();
        match &d {
            ColDiscretizer::Interval { start, step, num_bins } => {
                assert_eq!(*step, 1.0);
                assert_eq!(*start, 0.5);
                assert_eq!(*num_bins, 11);
            }
            other => panic!("expected interval, got {other:?}"),
        }
    }

    #[test]
    fn test_interval_agg_degenerate() {
        // No updates: inverted init range fails max > min.
        let d = ColAgg::interval(0, 8).into_discretizer();
        assert_eq!(d, ColDiscretizer::Interval { start: 0.0, step: 0.0, num_bins: 1 });

        // A constant column degenerates the same way.
        let mut agg = ColAgg::interval(0, 8);
        agg.update(5.0).unwrap();
        agg.update(5.0).unwrap();
        let d = agg.into_discretizer();
        assert_eq!(d.num_bins(), 1);
    }

    #[test]
    fn test_cat_agg_frequency_ranking() {
        let mut agg = ColAgg::cat(0, 8);
        for v in [3.0, 1.0, 3.0, 2.0, 3.0, 2.0] {
            agg.update(v).unwrap();
        }
        let d = agg.into_discretizer();
        // 3 appears thrice, 2 twice, 1 once.
        assert_eq!(d.transform(0, 3.0).unwrap(), 1);
        assert_eq!(d.transform(0, 2.0).unwrap(), 2);
        assert_eq!(d.transform(0, 1.0).unwrap(), 3);
    }

    #[test]
    fn test_cat_agg_ties_first_seen() {
        let mut agg = ColAgg::cat(0, 8);
        for v in [9.0, 4.0, 9.0, 4.0] {
            agg.update(v).unwrap();
        }
        let d = agg.into_discretizer();
        assert_eq!(d.transform(0, 9.0).unwrap(), 1);
        assert_eq!(d.transform(0, 4.0).unwrap(), 2);
    }

    #[test]
    fn test_cat_agg_overflow() {
        let mut agg = ColAgg::cat(7, 3);
        for v in [1.0, 2.0, 3.0] {
            agg.update(v).unwrap();
        }
        // Re-updating known values is fine.
        agg.update(2.0).unwrap();
        let err = agg.update(4.0).unwrap_err();
        assert!(matches!(
            err,
            HistBoostError::CardinalityOverflow { feature: 7, max_bins: 3 }
        ));
    }

    #[test]
    fn test_cat_merge_overflow() {
        let mut a = ColAgg::cat(0, 3);
        for v in [1.0, 2.0] {
            a.update(v).unwrap();
        }
        let mut b = ColAgg::cat(0, 3);
        for v in [3.0, 4.0] {
            b.update(v).unwrap();
        }
        assert!(a.merge(b).is_err());
    }

    #[test]
    fn test_rank_agg() {
        let mut agg = ColAgg::rank(0, 8);
        for v in [30.0, 10.0, 20.0, 10.0] {
            agg.update(v).unwrap();
        }
        let d = agg.into_discretizer();
        assert_eq!(d, ColDiscretizer::Rank { values: vec![10, 20, 30] });
    }

    #[test]
    fn test_rank_agg_overflow() {
        let mut agg = ColAgg::rank(1, 2);
        agg.update(1.0).unwrap();
        agg.update(2.0).unwrap();
        assert!(agg.update(3.0).is_err());
    }

    #[test]
    fn test_merge_combines_counts() {
        let mut a = ColAgg::cat(0, 8);
        for v in [1.0, 2.0, 2.0] {
            a.update(v).unwrap();
        }
        let mut b = ColAgg::cat(0, 8);
        for v in [1.0, 1.0, 1.0] {
            b.update(v).unwrap();
        }
        let d = a.merge(b).unwrap().into_discretizer();
        // Combined: 1 appears 4x, 2 appears 2x.
        assert_eq!(d.transform(0, 1.0).unwrap(), 1);
        assert_eq!(d.transform(0, 2.0).unwrap(), 2);
    }

    #[test]
    #[should_panic(expected = "merging aggregators of different kinds")]
    fn test_merge_kind_mismatch() {
        let a = ColAgg::cat(0, 4);
        let b = ColAgg::rank(0, 4);
        let _ = a.merge(b);
    }
}
