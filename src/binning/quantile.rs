//! Greenwald-Khanna approximate quantile summary.
//!
//! Maintains a compressed list of samples `(value, g, delta)` where `g` is
//! the gap in minimum rank to the previous sample and `delta` bounds the
//! uncertainty of the sample's rank. Any quantile query is answered within
//! `relative_error * count` ranks of the exact answer.
//!
//! Inserts go through a head buffer that is sorted and folded into the
//! sample list in batches; merging two summaries compresses both operands,
//! merges the sample lists with widened deltas, and compresses the result.

/// One retained sample.
#[derive(Clone, Copy, Debug)]
struct Sample {
    value: f64,
    /// Minimum-rank gap to the previous retained sample.
    g: u64,
    /// Rank uncertainty of this sample.
    delta: u64,
}

/// Default target relative rank error.
pub const DEFAULT_RELATIVE_ERROR: f64 = 0.001;

/// Head buffer size before inserts are folded into the sample list.
const HEAD_BUFFER_SIZE: usize = 5000;

// ============================================================================
// QuantileSummary
// ============================================================================

/// Mergeable streaming quantile sketch.
#[derive(Clone, Debug)]
pub struct QuantileSummary {
    relative_error: f64,
    samples: Vec<Sample>,
    count: u64,
    head: Vec<f64>,
}

impl Default for QuantileSummary {
    fn default() -> Self {
        Self::new(DEFAULT_RELATIVE_ERROR)
    }
}

impl QuantileSummary {
    /// Create an empty summary with the given target relative error.
    pub fn new(relative_error: f64) -> Self {
        assert!(
            relative_error > 0.0 && relative_error < 1.0,
            "relative_error must be in (0, 1)"
        );
        Self {
            relative_error,
            samples: Vec::new(),
            count: 0,
            head: Vec::new(),
        }
    }

    /// Number of values observed.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count + self.head.len() as u64
    }

    /// Insert one value.
    pub fn insert(&mut self, value: f64) {
        self.head.push(value);
        if self.head.len() >= HEAD_BUFFER_SIZE {
            self.flush();
            self.compress();
        }
    }

    /// Fold the head buffer into the sample list.
    fn flush(&mut self) {
        if self.head.is_empty() {
            return;
        }
        let mut head = std::mem::take(&mut self.head);
        head.sort_unstable_by(|a, b| a.total_cmp(b));

        let old = std::mem::take(&mut self.samples);
        let mut merged = Vec::with_capacity(old.len() + head.len());
        let mut count = self.count;
        let mut head_iter = head.into_iter().peekable();

        for (idx, sample) in old.iter().enumerate() {
            while head_iter
                .peek()
                .is_some_and(|v| *v <= sample.value)
            {
                let value = head_iter.next().expect("peeked");
                // Values inserted before the first or after the last retained
                // sample have exact rank.
                let delta = if idx == 0 {
                    0
                } else {
                    (2.0 * self.relative_error * count as f64).floor() as u64
                };
                merged.push(Sample { value, g: 1, delta });
                count += 1;
            }
            merged.push(*sample);
        }
        for value in head_iter {
            merged.push(Sample { value, g: 1, delta: 0 });
            count += 1;
        }

        self.samples = merged;
        self.count = count;
    }

    /// Merge adjacent samples whose combined rank uncertainty stays within
    /// the error budget.
    fn compress(&mut self) {
        if self.samples.len() <= 2 {
            return;
        }
        let threshold = 2.0 * self.relative_error * self.count as f64;
        let old = std::mem::take(&mut self.samples);
        let mut compressed: Vec<Sample> = Vec::with_capacity(old.len());

        // Walk from the tail, greedily folding samples into their successor.
        let mut iter = old.into_iter().rev();
        let mut head = iter.next().expect("at least one sample");
        for sample in iter {
            if (sample.g + head.g + head.delta) as f64 <= threshold {
                head.g += sample.g;
            } else {
                compressed.push(head);
                head = sample;
            }
        }
        compressed.push(head);
        compressed.reverse();
        self.samples = compressed;
    }

    /// Merge with another summary.
    ///
    /// Both operands are compressed first; the result holds the union of the
    /// observed values with deltas widened to stay within the looser of the
    /// two error targets.
    pub fn merge(mut self, mut other: QuantileSummary) -> QuantileSummary {
        self.flush();
        self.compress();
        other.flush();
        other.compress();

        if other.count == 0 {
            return self;
        }
        if self.count == 0 {
            return other;
        }

        let relative_error = self.relative_error.max(other.relative_error);
        let count = self.count + other.count;
        let self_widening = (2.0 * other.relative_error * other.count as f64).floor() as u64;
        let other_widening = (2.0 * self.relative_error * self.count as f64).floor() as u64;

        let mut merged = Vec::with_capacity(self.samples.len() + other.samples.len());
        let mut a = self.samples.into_iter().peekable();
        let mut b = other.samples.into_iter().peekable();
        let mut taken_a = 0usize;
        let mut taken_b = 0usize;

        loop {
            let take_a = match (a.peek(), b.peek()) {
                (Some(sa), Some(sb)) => sa.value < sb.value,
                _ => break,
            };
            let (mut next, widening, interleaved) = if take_a {
                let s = a.next().expect("peeked");
                taken_a += 1;
                (s, self_widening, taken_b > 0)
            } else {
                let s = b.next().expect("peeked");
                taken_b += 1;
                (s, other_widening, taken_a > 0)
            };
            // Samples interleaved with the other operand pick up its rank
            // uncertainty; a prefix drawn from one side alone does not.
            if interleaved {
                next.delta += widening;
            }
            merged.push(next);
        }
        merged.extend(a);
        merged.extend(b);

        let mut result = QuantileSummary {
            relative_error,
            samples: merged,
            count,
            head: Vec::new(),
        };
        result.compress();
        result
    }

    /// Query the value at the given quantile in `[0, 1]`.
    ///
    /// Returns `None` when no values have been observed.
    pub fn query(&mut self, quantile: f64) -> Option<f64> {
        assert!((0.0..=1.0).contains(&quantile), "quantile must be in [0, 1]");
        self.flush();
        self.compress();
        if self.samples.is_empty() {
            return None;
        }
        if quantile <= self.relative_error {
            return Some(self.samples[0].value);
        }
        if quantile >= 1.0 - self.relative_error {
            return Some(self.samples[self.samples.len() - 1].value);
        }

        let rank = (quantile * self.count as f64).ceil() as u64;
        // Tolerance from the sketch itself: exact sketches (all g=1, delta=0)
        // answer exactly, compressed sketches stay within the error target.
        let tolerance = self
            .samples
            .iter()
            .map(|s| s.g + s.delta)
            .max()
            .unwrap_or(0)
            / 2;
        let mut min_rank = 0u64;
        for sample in &self.samples[..self.samples.len() - 1] {
            min_rank += sample.g;
            let max_rank = min_rank + sample.delta;
            if max_rank <= rank + tolerance && rank <= min_rank + tolerance {
                return Some(sample.value);
            }
        }
        Some(self.samples[self.samples.len() - 1].value)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary() {
        let mut s = QuantileSummary::default();
        assert_eq!(s.count(), 0);
        assert_eq!(s.query(0.5), None);
    }

    #[test]
    fn test_small_exact() {
        let mut s = QuantileSummary::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0] {
            s.insert(v);
        }
        assert_eq!(s.count(), 8);
        assert_eq!(s.query(0.0), Some(1.0));
        assert_eq!(s.query(1.0), Some(8.0));
        let median = s.query(0.5).unwrap();
        assert!((4.0..=5.0).contains(&median), "median {median}");
    }

    #[test]
    fn test_rank_error_bound() {
        let n = 50_000u64;
        let mut s = QuantileSummary::new(0.001);
        for v in 0..n {
            s.insert(v as f64);
        }
        for q in [0.1, 0.25, 0.5, 0.75, 0.9] {
            let got = s.query(q).unwrap();
            let exact = q * n as f64;
            let err = (got - exact).abs();
            assert!(
                err <= 2.0 * 0.001 * n as f64 + 1.0,
                "quantile {q}: got {got}, exact {exact}"
            );
        }
    }

    #[test]
    fn test_merge_matches_single_stream() {
        let n = 20_000u64;
        let mut a = QuantileSummary::new(0.001);
        let mut b = QuantileSummary::new(0.001);
        for v in 0..n {
            if v % 2 == 0 {
                a.insert(v as f64);
            } else {
                b.insert(v as f64);
            }
        }
        let mut merged = a.merge(b);
        assert_eq!(merged.count(), n);
        for q in [0.25, 0.5, 0.75] {
            let got = merged.query(q).unwrap();
            let exact = q * n as f64;
            assert!(
                (got - exact).abs() <= 4.0 * 0.001 * n as f64 + 1.0,
                "quantile {q}: got {got}, exact {exact}"
            );
        }
    }

    #[test]
    fn test_merge_with_empty() {
        let mut a = QuantileSummary::default();
        a.insert(1.0);
        a.insert(2.0);
        let b = QuantileSummary::default();
        let mut merged = a.merge(b);
        assert_eq!(merged.count(), 2);
        assert_eq!(merged.query(1.0), Some(2.0));
    }

    #[test]
    fn test_duplicates() {
        let mut s = QuantileSummary::default();
        for _ in 0..1000 {
            s.insert(7.0);
        }
        assert_eq!(s.query(0.5), Some(7.0));
    }
}
