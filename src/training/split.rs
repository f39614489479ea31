//! Split candidates and per-histogram split search.
//!
//! A histogram is searched with one of three strategies:
//!
//! - sequential threshold scan for ordered (numerical/rank) columns, with a
//!   second scan on a rotated sequence to decide which side missing values
//!   should take;
//! - exhaustive subset enumeration for categorical columns with few
//!   occupied bins;
//! - a sort-then-scan heuristic for categorical columns with many occupied
//!   bins.
//!
//! Scores come from the regularized second-order objective; any candidate
//! whose weights, scores, or gain are not finite is dropped, never
//! surfaced.

use crate::binning::BinId;
use crate::config::BoostConfig;

use super::histograms::HistVal;

/// Share of total gradient/hessian mass bin 0 must hold before the
/// missing-goes-right scan is worth running.
const MISSING_MASS_THRESHOLD: f64 = 1e-3;

// ============================================================================
// Split
// ============================================================================

/// A fitted split for one node.
///
/// `stats` is `[left_weight, left_grad, left_hess, right_weight,
/// right_grad, right_hess]`; the child weights become the child leaf
/// predictions when the split is applied.
#[derive(Clone, Debug, PartialEq)]
pub enum Split {
    /// Ordered threshold over bin ids: left iff `bin <= threshold`.
    Seq {
        feature: u32,
        missing_go_left: bool,
        threshold: BinId,
        gain: f64,
        stats: [f64; 6],
    },
    /// Bin subset membership: left iff `bin` is in `left_set`.
    Set {
        feature: u32,
        missing_go_left: bool,
        /// Sorted ascending; never contains bin 0.
        left_set: Vec<BinId>,
        gain: f64,
        stats: [f64; 6],
    },
}

impl Split {
    /// Selected column this split tests.
    #[inline]
    pub fn feature(&self) -> u32 {
        match self {
            Self::Seq { feature, .. } | Self::Set { feature, .. } => *feature,
        }
    }

    /// Gain over leaving the node unsplit.
    #[inline]
    pub fn gain(&self) -> f64 {
        match self {
            Self::Seq { gain, .. } | Self::Set { gain, .. } => *gain,
        }
    }

    /// Child statistics.
    #[inline]
    pub fn stats(&self) -> &[f64; 6] {
        match self {
            Self::Seq { stats, .. } | Self::Set { stats, .. } => stats,
        }
    }

    /// Optimal weight of the left child.
    #[inline]
    pub fn left_weight(&self) -> f64 {
        self.stats()[0]
    }

    /// Optimal weight of the right child.
    #[inline]
    pub fn right_weight(&self) -> f64 {
        self.stats()[3]
    }

    /// Route one bin value. Bin 0 follows the fitted missing direction.
    pub fn goes_left(&self, bin: BinId) -> bool {
        match self {
            Self::Seq { missing_go_left, threshold, .. } => {
                if bin == 0 {
                    *missing_go_left
                } else {
                    bin <= *threshold
                }
            }
            Self::Set { missing_go_left, left_set, .. } => {
                if bin == 0 {
                    *missing_go_left
                } else {
                    left_set.binary_search(&bin).is_ok()
                }
            }
        }
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// Optimal leaf weight and score (negated regularized loss) for a gradient
/// pair under L1/L2 regularization.
///
/// With `alpha = 0` this is the plain Newton step `-G / (H + lambda)`;
/// otherwise the gradient is soft-thresholded first.
#[inline]
pub(crate) fn weight_and_score(g: f64, h: f64, alpha: f64, lambda: f64) -> (f64, f64) {
    let w = if alpha == 0.0 {
        -g / (h + lambda)
    } else {
        -g.signum() * (g.abs() - alpha).max(0.0) / (h + lambda)
    };
    let loss = (h + lambda) * w * w / 2.0 + g * w + alpha * w.abs();
    (w, -loss)
}

/// An admissible cut found by a sequential scan.
#[derive(Clone, Copy, Debug)]
struct SeqCut {
    /// Last index on the left side.
    cut: usize,
    gain: f64,
    stats: [f64; 6],
}

/// Scan every prefix cut of `grad`/`hess`, keeping the best admissible one.
///
/// A cut is admissible when both sides carry at least `min_node_hess`
/// hessian mass and all derived weights and scores are finite. Returns a
/// cut only when its gain over the unsplit score reaches `min_gain`.
fn seq_search(grad: &[f64], hess: &[f64], config: &BoostConfig) -> Option<SeqCut> {
    let b = grad.len();
    if b <= 1 {
        return None;
    }
    let alpha = config.reg_alpha;
    let lambda = config.reg_lambda;

    let g_total: f64 = grad.iter().sum();
    let h_total: f64 = hess.iter().sum();
    let (_, base_score) = weight_and_score(g_total, h_total, alpha, lambda);

    let mut best: Option<(usize, f64, [f64; 6])> = None;
    let mut g_left = 0.0;
    let mut h_left = 0.0;
    for i in 0..b - 1 {
        g_left += grad[i];
        h_left += hess[i];
        let g_right = g_total - g_left;
        let h_right = h_total - h_left;
        if h_left < config.min_node_hess || h_right < config.min_node_hess {
            continue;
        }
        let (w_left, s_left) = weight_and_score(g_left, h_left, alpha, lambda);
        let (w_right, s_right) = weight_and_score(g_right, h_right, alpha, lambda);
        let score = s_left + s_right;
        if !w_left.is_finite() || !w_right.is_finite() || !score.is_finite() {
            continue;
        }
        if best.map_or(true, |(_, s, _)| score > s) {
            best = Some((
                i,
                score,
                [w_left, g_left, h_left, w_right, g_right, h_right],
            ));
        }
    }

    let (cut, score, stats) = best?;
    let gain = score - base_score;
    if !gain.is_finite() || gain < config.min_gain {
        return None;
    }
    Some(SeqCut { cut, gain, stats })
}

// ============================================================================
// Sequential splits
// ============================================================================

/// Find the best threshold split over an ordered histogram.
///
/// The plain scan keeps bin 0 with the left prefix (missing goes left).
/// When bin 0 carries meaningful mass, a second scan over the rotation
/// `[1.., 0]` evaluates the missing-goes-right alternative; its cut index
/// shifts by one to report a threshold in the original bin numbering. Equal
/// gains keep the missing-left candidate.
pub fn split_seq(feature: u32, grad: &[f64], hess: &[f64], config: &BoostConfig) -> Option<Split> {
    let left_cand = seq_search(grad, hess, config).map(|c| Split::Seq {
        feature,
        missing_go_left: true,
        threshold: c.cut as BinId,
        gain: c.gain,
        stats: c.stats,
    });

    let abs_grad: f64 = grad.iter().map(|g| g.abs()).sum();
    let abs_hess: f64 = hess.iter().map(|h| h.abs()).sum();
    let missing_matters = grad[0].abs() >= MISSING_MASS_THRESHOLD * abs_grad
        || hess[0].abs() >= MISSING_MASS_THRESHOLD * abs_hess;
    if !missing_matters {
        return left_cand;
    }

    let mut rot_grad = Vec::with_capacity(grad.len());
    rot_grad.extend_from_slice(&grad[1..]);
    rot_grad.push(grad[0]);
    let mut rot_hess = Vec::with_capacity(hess.len());
    rot_hess.extend_from_slice(&hess[1..]);
    rot_hess.push(hess[0]);

    let right_cand = seq_search(&rot_grad, &rot_hess, config).map(|c| Split::Seq {
        feature,
        missing_go_left: false,
        threshold: c.cut as BinId + 1,
        gain: c.gain,
        stats: c.stats,
    });

    match (left_cand, right_cand) {
        (Some(l), Some(r)) => Some(if l.gain() >= r.gain() { l } else { r }),
        (l, r) => l.or(r),
    }
}

// ============================================================================
// Set splits
// ============================================================================

/// Indices of bins with any gradient or hessian mass.
fn nonzero_bins(grad: &[f64], hess: &[f64]) -> Vec<usize> {
    (0..grad.len())
        .filter(|&i| grad[i] != 0.0 || hess[i] != 0.0)
        .collect()
}

/// Exhaustive subset search over the occupied bins.
///
/// The first occupied bin is pinned to the right side, which halves the
/// enumeration by skipping mirrored partitions.
pub fn split_set_brute(
    feature: u32,
    grad: &[f64],
    hess: &[f64],
    config: &BoostConfig,
) -> Option<Split> {
    let nz = nonzero_bins(grad, hess);
    let nnz = nz.len();
    if nnz <= 1 {
        return None;
    }
    let alpha = config.reg_alpha;
    let lambda = config.reg_lambda;

    let g_total: f64 = nz.iter().map(|&i| grad[i]).sum();
    let h_total: f64 = nz.iter().map(|&i| hess[i]).sum();
    let (_, base_score) = weight_and_score(g_total, h_total, alpha, lambda);

    let mut best: Option<(u64, f64, [f64; 6])> = None;
    for mask in 1u64..(1u64 << (nnz - 1)) {
        let mut g_left = 0.0;
        let mut h_left = 0.0;
        for (bit, &bin) in nz[1..].iter().enumerate() {
            if mask >> bit & 1 == 1 {
                g_left += grad[bin];
                h_left += hess[bin];
            }
        }
        let g_right = g_total - g_left;
        let h_right = h_total - h_left;
        if h_left < config.min_node_hess || h_right < config.min_node_hess {
            continue;
        }
        let (w_left, s_left) = weight_and_score(g_left, h_left, alpha, lambda);
        let (w_right, s_right) = weight_and_score(g_right, h_right, alpha, lambda);
        let score = s_left + s_right;
        if !w_left.is_finite() || !w_right.is_finite() || !score.is_finite() {
            continue;
        }
        if best.map_or(true, |(_, s, _)| score > s) {
            best = Some((
                mask,
                score,
                [w_left, g_left, h_left, w_right, g_right, h_right],
            ));
        }
    }

    let (mask, score, stats) = best?;
    let gain = score - base_score;
    if !gain.is_finite() || gain < config.min_gain {
        return None;
    }
    let set1: Vec<usize> = nz[1..]
        .iter()
        .enumerate()
        .filter(|(bit, _)| mask >> bit & 1 == 1)
        .map(|(_, &bin)| bin)
        .collect();
    Some(create_set_split(feature, &nz, set1, gain, stats))
}

/// Sort-then-scan heuristic for categorical columns with many occupied
/// bins: occupied bins are ordered by `grad / (hess + lambda / B)` and the
/// best prefix cut of that ordering becomes the left set.
pub fn split_set_heuristic(
    feature: u32,
    grad: &[f64],
    hess: &[f64],
    config: &BoostConfig,
) -> Option<Split> {
    let mut nz = nonzero_bins(grad, hess);
    if nz.len() <= 1 {
        return None;
    }
    let smoothing = config.reg_lambda / grad.len() as f64;
    nz.sort_by(|&a, &b| {
        let ka = grad[a] / (hess[a] + smoothing);
        let kb = grad[b] / (hess[b] + smoothing);
        ka.total_cmp(&kb)
    });

    let sorted_grad: Vec<f64> = nz.iter().map(|&i| grad[i]).collect();
    let sorted_hess: Vec<f64> = nz.iter().map(|&i| hess[i]).collect();
    let cut = seq_search(&sorted_grad, &sorted_hess, config)?;

    let set1: Vec<usize> = nz[..=cut.cut].to_vec();
    Some(create_set_split(feature, &nz, set1, cut.gain, cut.stats))
}

/// Finalize a set split from the chosen bin partition.
///
/// Bin 0 is pulled out of either side into the missing direction, then the
/// smaller side becomes the left set; when the sides swap, the two halves
/// of `stats` swap with them.
fn create_set_split(
    feature: u32,
    nonzero: &[usize],
    set1: Vec<usize>,
    gain: f64,
    stats: [f64; 6],
) -> Split {
    let mut set2: Vec<usize> = nonzero.iter().copied().filter(|b| !set1.contains(b)).collect();
    let mut set1 = set1;
    set1.sort_unstable();
    set2.sort_unstable();

    let missing_in_set1 = set1.first() == Some(&0);
    if missing_in_set1 {
        set1.remove(0);
    }
    let missing_in_set2 = set2.first() == Some(&0);
    if missing_in_set2 {
        set2.remove(0);
    }

    let (left, missing_go_left, stats) = if set1.len() <= set2.len() {
        (set1, missing_in_set1, stats)
    } else {
        let [lw, lg, lh, rw, rg, rh] = stats;
        (set2, missing_in_set2, [rw, rg, rh, lw, lg, lh])
    };

    Split::Set {
        feature,
        missing_go_left,
        left_set: left.into_iter().map(|b| b as BinId).collect(),
        gain,
        stats,
    }
}

// ============================================================================
// Per-histogram entry point
// ============================================================================

/// Search one histogram for its best split.
///
/// Returns `None` when the histogram has at most one occupied bin, or no
/// admissible candidate reaches `min_gain`.
pub fn split_hist<H: HistVal>(
    feature: u32,
    hist: &[H],
    is_seq: bool,
    config: &BoostConfig,
) -> Option<Split> {
    let b = hist.len() / 2;
    if b <= 1 {
        return None;
    }
    let grad: Vec<f64> = (0..b).map(|i| hist[2 * i].to_f64()).collect();
    let hess: Vec<f64> = (0..b).map(|i| hist[2 * i + 1].to_f64()).collect();

    let nnz = nonzero_bins(&grad, &hess).len();
    if nnz <= 1 {
        return None;
    }

    if is_seq {
        split_seq(feature, &grad, &hess, config)
    } else if nnz as i64 <= config.max_brute_bins as i64 {
        split_set_brute(feature, &grad, &hess, config)
    } else {
        split_set_heuristic(feature, &grad, &hess, config)
    }
}

// ============================================================================
// Tests
// ============================================================================
