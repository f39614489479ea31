//! Gradient/hessian histograms per (node, feature).
//!
//! A histogram is a dense vector laid out `[g0, h0, g1, h1, ..]`, indexed by
//! bin id and grown on demand: positions past the highest touched bin are
//! never materialized. Aggregation is associative and commutative, so
//! per-partition accumulators can be merged in any order.
//!
//! Below the root level only left-child histograms are computed by
//! scanning; each right child comes from the subtraction trick
//! (`right = parent - left`), which halves the scan work per level.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::binning::BinId;
use crate::data::ParallelDataset;

use super::Instance;

// ============================================================================
// HistVal
// ============================================================================

/// Histogram element type: `f32` for compact histograms, `f64` for extra
/// headroom. Scoring always happens in `f64`; this type only controls the
/// accumulation and storage width.
pub trait HistVal:
    Copy
    + Default
    + PartialEq
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + std::ops::AddAssign
    + std::ops::SubAssign
    + 'static
{
    /// Additive identity.
    const ZERO: Self;

    /// Widen to `f64` for scoring.
    fn to_f64(self) -> f64;

    /// Narrow from `f64`.
    fn from_f64(v: f64) -> Self;
}

impl HistVal for f32 {
    const ZERO: Self = 0.0;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl HistVal for f64 {
    const ZERO: Self = 0.0;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }
}

/// Key of one histogram: (node id, selected column index).
pub type HistKey = (u64, u32);

// ============================================================================
// Building
// ============================================================================

/// Accumulate one gradient pair into a grow-on-demand histogram.
#[inline]
fn accumulate<H: HistVal>(hist: &mut Vec<H>, bin: BinId, grad: H, hess: H) {
    let slot = 2 * bin as usize;
    if hist.len() < slot + 2 {
        hist.resize(slot + 2, H::ZERO);
    }
    hist[slot] += grad;
    hist[slot + 1] += hess;
}

/// Merge `src` into `dst` element-wise, growing `dst` as needed.
#[inline]
fn merge<H: HistVal>(dst: &mut Vec<H>, src: Vec<H>) {
    if dst.len() < src.len() {
        dst.resize(src.len(), H::ZERO);
    }
    for (i, v) in src.into_iter().enumerate() {
        dst[i] += v;
    }
}

/// Build one histogram per (node id, selected column) over `data`.
///
/// Gradient pairs are aggregated locally per partition, then shuffled by
/// histogram key into `parallelism` output partitions and merged.
pub fn compute_hists<H: HistVal>(
    data: &ParallelDataset<(Instance<H>, u64)>,
    parallelism: usize,
) -> ParallelDataset<(HistKey, Vec<H>)> {
    data.flat_map(|(inst, node_id)| {
        inst.bins
            .iter()
            .enumerate()
            .map(|(col, &bin)| ((*node_id, col as u32), (bin, inst.grad, inst.hess)))
            .collect::<Vec<_>>()
    })
    .aggregate_by_key(
        Vec::new,
        |hist, &(bin, grad, hess)| accumulate(hist, bin, grad, hess),
        |hist, other| merge(hist, other),
        parallelism,
    )
}

/// Derive both children's histograms from parents and computed left
/// children, pruning children that can never split again.
///
/// Left histograms are re-keyed to their parent id and joined against the
/// parent histograms; the right sibling is the element-wise difference over
/// the left histogram's length, with trailing parent positions carried
/// over. A child survives only if it still has at least two nonzero bins
/// and enough hessian mass for both sides of a further split.
pub fn subtract_hists<H: HistVal>(
    parent_hists: &ParallelDataset<(HistKey, Vec<H>)>,
    left_hists: &ParallelDataset<(HistKey, Vec<H>)>,
    min_node_hess: f64,
    parallelism: usize,
) -> ParallelDataset<(HistKey, Vec<H>)> {
    let by_parent =
        left_hists.map(|((node, col), hist)| ((node >> 1, *col), (*node, hist.clone())));

    parent_hists
        .join(&by_parent, parallelism)
        .flat_map(|((_, col), (parent, (left_node, left)))| {
            assert!(
                left.len() <= parent.len(),
                "left child histogram longer than its parent"
            );
            let mut right = parent.clone();
            for (i, v) in left.iter().enumerate() {
                right[i] -= *v;
            }
            [((*left_node, *col), left.clone()), ((left_node | 1, *col), right)]
                .into_iter()
                .filter(|(_, hist)| can_split_again(hist, min_node_hess))
                .collect::<Vec<_>>()
        })
}

/// Whether a histogram can still produce a split: at least two bins carry
/// mass and the hessian sum leaves room for two children above
/// `min_node_hess`.
pub fn can_split_again<H: HistVal>(hist: &[H], min_node_hess: f64) -> bool {
    let mut nnz = 0usize;
    let mut hess_sum = 0.0f64;
    for pair in hist.chunks_exact(2) {
        if pair[0] != H::ZERO || pair[1] != H::ZERO {
            nnz += 1;
            hess_sum += pair[1].to_f64();
        }
    }
    nnz >= 2 && hess_sum >= 2.0 * min_node_hess
}

// ============================================================================
// Parallelism heuristic
// ============================================================================

/// Output partition count for histogram shuffles at one tree level.
///
/// Scales with the expected histogram count for the level, quantized to a
/// multiple of the non-driver worker count and capped so tiny levels do not
/// fan out into thousands of near-empty partitions.
pub fn compute_parallelism(num_leaves: u64, num_cols: usize, col_sample_by_level: f64) -> usize {
    let workers = rayon::current_num_threads();
    if workers <= 1 {
        return 1;
    }
    let approx_hists = num_leaves as f64 * num_cols as f64 * col_sample_by_level;
    let per_worker = (approx_hists / (workers - 1) as f64).ceil().clamp(1.0, 128.0);
    per_worker as usize * (workers - 1)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(grad: f64, hess: f64, bins: Vec<BinId>) -> Instance<f64> {
        Instance::new(grad, hess, bins)
    }

    fn to_map(
        hists: &ParallelDataset<(HistKey, Vec<f64>)>,
    ) -> std::collections::HashMap<HistKey, Vec<f64>> {
        hists.collect().into_iter().collect()
    }

    #[test]
    fn test_compute_hists_accumulates_by_bin() {
        let data = ParallelDataset::from_vec(
            vec![
                (inst(1.0, 0.5, vec![1, 2]), 1),
                (inst(2.0, 1.0, vec![1, 0]), 1),
                (inst(4.0, 2.0, vec![2, 2]), 1),
            ],
            2,
        );
        let hists = to_map(&compute_hists(&data, 2));

        // Column 0: bin 1 holds rows 0+1, bin 2 holds row 2.
        assert_eq!(hists[&(1, 0)], vec![0.0, 0.0, 3.0, 1.5, 4.0, 2.0]);
        // Column 1: bin 0 (missing), bin 2 holds rows 0+2.
        assert_eq!(hists[&(1, 1)], vec![2.0, 1.0, 0.0, 0.0, 5.0, 2.5]);
    }

    #[test]
    fn test_compute_hists_conservation() {
        let n = 100;
        let data = ParallelDataset::from_vec(
            (0..n)
                .map(|i| (inst(i as f64, 1.0, vec![(i % 5) as BinId + 1]), 1u64))
                .collect(),
            7,
        );
        let hists = to_map(&compute_hists(&data, 3));
        let hist = &hists[&(1, 0)];

        let grad_sum: f64 = hist.iter().step_by(2).sum();
        let hess_sum: f64 = hist.iter().skip(1).step_by(2).sum();
        assert_eq!(grad_sum, (0..n).sum::<i64>() as f64);
        assert_eq!(hess_sum, n as f64);
    }

    #[test]
    fn test_compute_hists_grows_to_touched_bin() {
        let data = ParallelDataset::from_vec(vec![(inst(1.0, 1.0, vec![3]), 1)], 1);
        let hists = to_map(&compute_hists(&data, 1));
        assert_eq!(hists[&(1, 0)].len(), 8); // bins 0..=3, two slots each
    }

    #[test]
    fn test_subtract_recovers_right_child() {
        let parent = ParallelDataset::from_vec(
            vec![((2u64, 0u32), vec![3.0, 3.0, 5.0, 5.0, 2.0, 2.0])],
            1,
        );
        let left = ParallelDataset::from_vec(vec![((4u64, 0u32), vec![1.0, 1.0, 2.0, 2.0])], 1);
        let out = to_map(&subtract_hists(&parent, &left, 0.0, 2));

        assert_eq!(out[&(4, 0)], vec![1.0, 1.0, 2.0, 2.0]);
        // Trailing parent positions carry over to the right child.
        assert_eq!(out[&(5, 0)], vec![2.0, 2.0, 3.0, 3.0, 2.0, 2.0]);
    }

    #[test]
    fn test_subtract_children_sum_to_parent() {
        let parent_hist = vec![1.0, 1.0, 4.0, 2.0, 6.0, 3.0, 2.0, 1.0];
        let left_hist = vec![0.0, 0.0, 1.0, 0.5, 3.0, 1.5];
        let parent = ParallelDataset::from_vec(vec![((1u64, 2u32), parent_hist.clone())], 1);
        let left = ParallelDataset::from_vec(vec![((2u64, 2u32), left_hist.clone())], 1);
        let out = to_map(&subtract_hists(&parent, &left, 0.0, 1));

        let l = &out[&(2, 2)];
        let r = &out[&(3, 2)];
        for i in 0..parent_hist.len() {
            let lv = l.get(i).copied().unwrap_or(0.0);
            assert_eq!(lv + r[i], parent_hist[i], "position {i}");
        }
    }

    #[test]
    fn test_subtract_prunes_exhausted_children() {
        // Left child has all the mass in one bin: nnz == 1, pruned.
        // Right child keeps two nonzero bins and survives.
        let parent = ParallelDataset::from_vec(
            vec![((1u64, 0u32), vec![0.0, 0.0, 2.0, 2.0, 3.0, 3.0])],
            1,
        );
        let left = ParallelDataset::from_vec(vec![((2u64, 0u32), vec![0.0, 0.0, 2.0, 2.0])], 1);
        let out = to_map(&subtract_hists(&parent, &left, 0.0, 1));
        assert!(!out.contains_key(&(2, 0)));
        // right = [0,0,0,0,3,3] has nnz == 1 as well, so it is pruned too.
        assert!(!out.contains_key(&(3, 0)));
    }

    #[test]
    fn test_subtract_prunes_low_hessian() {
        // nnz >= 2 on both sides, but the left child's hessian mass (5) is
        // below 2 * min_node_hess = 20.
        let parent = ParallelDataset::from_vec(
            vec![((1u64, 0u32), vec![0.0, 0.0, 4.0, 15.0, 4.0, 15.0])],
            1,
        );
        let left =
            ParallelDataset::from_vec(vec![((2u64, 0u32), vec![0.0, 0.0, 2.0, 2.0, 2.0, 3.0])], 1);
        let out = to_map(&subtract_hists(&parent, &left, 10.0, 1));
        assert!(!out.contains_key(&(2, 0)));
        // Right child keeps 25 hessian mass across two bins.
        assert!(out.contains_key(&(3, 0)));
    }

    #[test]
    fn test_can_split_again() {
        assert!(can_split_again(&[1.0, 1.0, 1.0, 1.0], 0.0));
        assert!(!can_split_again(&[0.0, 0.0, 1.0, 1.0], 0.0)); // one nonzero bin
        assert!(!can_split_again(&[1.0, 4.0, 1.0, 5.0], 5.0)); // 9 < 10
        assert!(can_split_again(&[1.0, 5.0, 1.0, 5.0], 5.0));
    }

    #[test]
    fn test_parallelism_heuristic() {
        let workers = rayon::current_num_threads();
        let p = compute_parallelism(8, 10, 1.0);
        if workers <= 1 {
            assert_eq!(p, 1);
        } else {
            assert_eq!(p % (workers - 1), 0);
            assert!(p >= workers - 1);
            assert!(p <= 128 * (workers - 1));
        }
    }
}
