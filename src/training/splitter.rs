//! Per-node split selection across features.
//!
//! Takes the level's histogram dataset, optionally samples columns for the
//! level, searches every surviving histogram, and keeps the best-gain split
//! per node. Selection is a two-stage reduce: best-per-node inside each
//! partition, then a bounded-fan-in tree reduce across partitions.

use std::collections::HashMap;

use crate::config::{BoostConfig, TreeConfig};
use crate::data::ParallelDataset;

use super::histograms::{HistKey, HistVal};
use super::split::{split_hist, Split};

/// Find the best split per node over one level's histograms.
///
/// `seed` drives the per-level Bernoulli column sampling; sampling is a
/// pass-through when `col_sample_by_level` is 1. Nodes with no admissible
/// split are simply absent from the result.
pub fn find_splits<H: HistVal>(
    hists: &ParallelDataset<(HistKey, Vec<H>)>,
    config: &BoostConfig,
    tree_config: &TreeConfig,
    seed: u64,
) -> HashMap<u64, Split> {
    let sampled = hists.sample(config.col_sample_by_level, seed);

    let per_partition = sampled.map_partitions_with_index(|_, part| {
        let mut best: HashMap<u64, Split> = HashMap::new();
        for ((node, col), hist) in part {
            let col = *col as usize;
            assert!(col < tree_config.num_cols, "histogram column out of range");
            if let Some(split) =
                split_hist(col as u32, hist, tree_config.is_seq(col), config)
            {
                insert_if_better(&mut best, *node, split);
            }
        }
        vec![best]
    });

    per_partition
        .tree_reduce(merge_best, config.aggregation_depth as usize)
        .unwrap_or_default()
}

/// Keep the higher-gain split per node; the incumbent wins ties.
fn insert_if_better(best: &mut HashMap<u64, Split>, node: u64, split: Split) {
    match best.entry(node) {
        std::collections::hash_map::Entry::Occupied(mut e) => {
            if split.gain() > e.get().gain() {
                e.insert(split);
            }
        }
        std::collections::hash_map::Entry::Vacant(e) => {
            e.insert(split);
        }
    }
}

fn merge_best(mut a: HashMap<u64, Split>, b: HashMap<u64, Split>) -> HashMap<u64, Split> {
    for (node, split) in b {
        insert_if_better(&mut a, node, split);
    }
    a
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BoostConfig {
        let mut c = BoostConfig::default();
        c.reg_lambda = 0.0;
        c.min_node_hess = 0.0;
        c
    }

    fn tree_config(num_cols: usize) -> TreeConfig {
        TreeConfig::new(0, 0, (0..num_cols as u32).collect(), vec![true; num_cols])
    }

    /// Histogram over three bins whose best cut gain grows with `spread`.
    fn hist(spread: f64) -> Vec<f64> {
        vec![0.0, 0.0, spread, 1.0, -spread, 1.0]
    }

    #[test]
    fn test_best_split_per_node() {
        let hists = ParallelDataset::from_vec(
            vec![
                ((4u64, 0u32), hist(1.0)),
                ((4u64, 1u32), hist(3.0)),
                ((5u64, 0u32), hist(2.0)),
            ],
            2,
        );
        let tc = tree_config(2);
        let splits = find_splits(&hists, &config(), &tc, 7);

        assert_eq!(splits.len(), 2);
        assert_eq!(splits[&4].feature(), 1);
        assert_eq!(splits[&5].feature(), 0);
        assert!(splits[&4].gain() > splits[&5].gain());
    }

    #[test]
    fn test_deterministic_across_runs() {
        let entries: Vec<(HistKey, Vec<f64>)> = (0..20)
            .map(|i| ((2 + (i % 4) as u64, (i / 4) as u32), hist(1.0 + i as f64)))
            .collect();
        let tc = tree_config(5);
        let mut c = config();
        c.col_sample_by_level = 0.6;

        let a = find_splits(&ParallelDataset::from_vec(entries.clone(), 3), &c, &tc, 99);
        let b = find_splits(&ParallelDataset::from_vec(entries, 3), &c, &tc, 99);
        assert_eq!(a, b);
    }

    #[test]
    fn test_column_sampling_drops_entries() {
        let entries: Vec<(HistKey, Vec<f64>)> =
            (0..200).map(|i| ((1u64, i as u32), hist(1.0))).collect();
        let tc = tree_config(200);

        let mut c = config();
        let full = find_splits(&ParallelDataset::from_vec(entries.clone(), 4), &c, &tc, 1);
        assert_eq!(full.len(), 1);

        // A vanishing sampling rate keeps no histogram at all.
        c.col_sample_by_level = 1e-6;
        let sampled = find_splits(&ParallelDataset::from_vec(entries, 4), &c, &tc, 1);
        assert!(sampled.is_empty());
    }

    #[test]
    fn test_min_gain_returns_empty() {
        let hists = ParallelDataset::from_vec(vec![((1u64, 0u32), hist(0.1))], 1);
        let tc = tree_config(1);
        let mut c = config();
        c.min_gain = 1e6;
        assert!(find_splits(&hists, &c, &tc, 0).is_empty());
    }

    #[test]
    fn test_feasibility_min_hess() {
        let hists = ParallelDataset::from_vec(
            vec![((1u64, 0u32), vec![0.0, 0.0, 1.0, 0.4, -1.0, 0.4])],
            1,
        );
        let tc = tree_config(1);
        let mut c = config();
        c.min_node_hess = 0.5;
        assert!(find_splits(&hists, &c, &tc, 0).is_empty());

        c.min_node_hess = 0.3;
        let splits = find_splits(&hists, &c, &tc, 0);
        let stats = splits[&1].stats();
        assert!(stats[2] >= 0.3 && stats[5] >= 0.3);
    }
}
