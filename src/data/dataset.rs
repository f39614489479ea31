//! In-memory partitioned dataset with map/shuffle/reduce primitives.
//!
//! A [`ParallelDataset`] is an immutable collection split into partitions.
//! Per-partition work runs on the rayon pool; shuffles (`aggregate_by_key`,
//! `join`) bucket entries by key hash into a requested number of output
//! partitions. Every reduction used by the training core is associative and
//! commutative, so results do not depend on partition count or combine
//! depth.
//!
//! Hashing uses a fixed-key hasher so that shuffle bucketing and merge
//! order are reproducible across runs: floating-point accumulation order is
//! part of the observable behavior of histogram aggregation.

use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::fs;
use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::Serialize;

use crate::config::StorageLevel;
use crate::error::Result;

/// HashMap with a fixed-key hasher for reproducible iteration order.
type DetMap<K, V> = HashMap<K, V, BuildHasherDefault<DefaultHasher>>;

/// Per-partition seed derivation constant (splitmix64 increment).
const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Monotonic id source for checkpoint directories.
static CHECKPOINT_SEQ: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// ParallelDataset
// ============================================================================

/// An immutable, partitioned, in-memory dataset.
///
/// Cloning is cheap: partitions are shared behind an [`Arc`]. Transformations
/// produce new datasets and never mutate existing partitions.
pub struct ParallelDataset<T> {
    partitions: Arc<Vec<Vec<T>>>,
    persisted: Arc<AtomicBool>,
}

impl<T> Clone for ParallelDataset<T> {
    fn clone(&self) -> Self {
        Self {
            partitions: Arc::clone(&self.partitions),
            persisted: Arc::clone(&self.persisted),
        }
    }
}

impl<T> ParallelDataset<T> {
    /// Build a dataset from pre-made partitions.
    pub fn from_partitions(partitions: Vec<Vec<T>>) -> Self {
        Self {
            partitions: Arc::new(partitions),
            persisted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Split `items` into `num_partitions` contiguous, near-equal partitions.
    pub fn from_vec(items: Vec<T>, num_partitions: usize) -> Self {
        let np = num_partitions.max(1);
        let total = items.len();
        let base = total / np;
        let extra = total % np;

        let mut partitions = Vec::with_capacity(np);
        let mut iter = items.into_iter();
        for p in 0..np {
            let size = base + usize::from(p < extra);
            partitions.push(iter.by_ref().take(size).collect());
        }
        Self::from_partitions(partitions)
    }

    /// Number of partitions.
    #[inline]
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Total number of elements.
    pub fn count(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    /// True when the dataset holds no elements.
    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Vec::is_empty)
    }

    /// Borrow the raw partitions.
    #[inline]
    pub fn partitions(&self) -> &[Vec<T>] {
        &self.partitions
    }

    /// Mark this dataset as persisted at the given storage level.
    ///
    /// The in-memory backend is always materialized; the flag drives the
    /// [`Checkpointer`](super::Checkpointer) queue discipline.
    pub fn persist(&self, _level: StorageLevel) -> &Self {
        self.persisted.store(true, Ordering::Release);
        self
    }

    /// Clear the persisted flag.
    pub fn unpersist(&self) {
        self.persisted.store(false, Ordering::Release);
    }

    /// Whether [`persist`](Self::persist) has been called.
    pub fn is_persisted(&self) -> bool {
        self.persisted.load(Ordering::Acquire)
    }
}

// ============================================================================
// Transformations
// ============================================================================

impl<T: Send + Sync> ParallelDataset<T> {
    /// Element-wise transform, preserving partitioning.
    pub fn map<U, F>(&self, f: F) -> ParallelDataset<U>
    where
        U: Send,
        F: Fn(&T) -> U + Sync,
    {
        let partitions = self
            .partitions
            .par_iter()
            .map(|part| part.iter().map(&f).collect())
            .collect();
        ParallelDataset::from_partitions(partitions)
    }

    /// Keep elements matching the predicate.
    pub fn filter<F>(&self, pred: F) -> ParallelDataset<T>
    where
        T: Clone,
        F: Fn(&T) -> bool + Sync,
    {
        let partitions = self
            .partitions
            .par_iter()
            .map(|part| part.iter().filter(|&x| pred(x)).cloned().collect())
            .collect();
        ParallelDataset::from_partitions(partitions)
    }

    /// Transform each element into zero or more outputs.
    pub fn flat_map<U, I, F>(&self, f: F) -> ParallelDataset<U>
    where
        U: Send,
        I: IntoIterator<Item = U>,
        F: Fn(&T) -> I + Sync,
    {
        let partitions = self
            .partitions
            .par_iter()
            .map(|part| part.iter().flat_map(&f).collect())
            .collect();
        ParallelDataset::from_partitions(partitions)
    }

    /// Transform whole partitions, with access to the partition index.
    pub fn map_partitions_with_index<U, F>(&self, f: F) -> ParallelDataset<U>
    where
        U: Send,
        F: Fn(usize, &[T]) -> Vec<U> + Sync,
    {
        let partitions = self
            .partitions
            .par_iter()
            .enumerate()
            .map(|(idx, part)| f(idx, part))
            .collect();
        ParallelDataset::from_partitions(partitions)
    }

    /// Pair this dataset element-wise with another of identical shape.
    ///
    /// # Panics
    ///
    /// Panics when partition counts or per-partition lengths differ.
    pub fn zip<U>(&self, other: &ParallelDataset<U>) -> ParallelDataset<(T, U)>
    where
        T: Clone,
        U: Clone + Send + Sync,
    {
        assert_eq!(
            self.num_partitions(),
            other.num_partitions(),
            "zip requires identical partition counts"
        );
        let partitions = self
            .partitions
            .par_iter()
            .zip(other.partitions.par_iter())
            .map(|(a, b)| {
                assert_eq!(a.len(), b.len(), "zip requires identical partition lengths");
                a.iter().cloned().zip(b.iter().cloned()).collect()
            })
            .collect();
        ParallelDataset::from_partitions(partitions)
    }

    /// Bernoulli sample with the given fraction.
    ///
    /// The RNG is seeded per partition from `seed` and the partition index,
    /// so results are reproducible and independent of worker scheduling.
    pub fn sample(&self, fraction: f64, seed: u64) -> ParallelDataset<T>
    where
        T: Clone,
    {
        if fraction >= 1.0 {
            return self.clone();
        }
        self.map_partitions_with_index(|idx, part| {
            let part_seed = seed.wrapping_add((idx as u64).wrapping_mul(SEED_MIX));
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(part_seed);
            part.iter()
                .filter(|_| rng.gen::<f64>() < fraction)
                .cloned()
                .collect()
        })
    }

    /// Gather every element into one vector, in partition order.
    pub fn collect(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut out = Vec::with_capacity(self.count());
        for part in self.partitions.iter() {
            out.extend(part.iter().cloned());
        }
        out
    }
}

// ============================================================================
// Reductions
// ============================================================================

impl<T: Send + Sync> ParallelDataset<T> {
    /// Fold each partition with `seq_op`, then combine the partial results
    /// with `comb_op` in a tree of bounded fan-in.
    ///
    /// `depth >= 2` caps how many partials any single combine step touches,
    /// trading a little latency for bounded driver-side pressure. Both
    /// operators must be associative and commutative.
    pub fn tree_aggregate<A, S, C>(&self, zero: A, seq_op: S, comb_op: C, depth: usize) -> A
    where
        A: Clone + Send + Sync,
        S: Fn(A, &T) -> A + Sync,
        C: Fn(A, A) -> A + Sync + Send,
    {
        let partials: Vec<A> = self
            .partitions
            .par_iter()
            .map(|part| part.iter().fold(zero.clone(), &seq_op))
            .collect();
        tree_combine(partials, &comb_op, depth).unwrap_or(zero)
    }

    /// Reduce all elements with `f`, combining per-partition results in a
    /// tree of bounded fan-in. Returns `None` for an empty dataset.
    pub fn tree_reduce<F>(&self, f: F, depth: usize) -> Option<T>
    where
        T: Clone,
        F: Fn(T, T) -> T + Sync + Send,
    {
        let partials: Vec<T> = self
            .partitions
            .par_iter()
            .filter_map(|part| part.iter().cloned().reduce(&f))
            .collect();
        tree_combine(partials, &f, depth)
    }
}

/// Combine partials in rounds of bounded fan-in until one value remains.
fn tree_combine<A, C>(mut partials: Vec<A>, comb_op: &C, depth: usize) -> Option<A>
where
    A: Clone + Send + Sync,
    C: Fn(A, A) -> A + Sync + Send,
{
    if partials.is_empty() {
        return None;
    }
    // Fan-in per round so that `depth` rounds cover the initial width.
    let scale = ((partials.len() as f64).powf(1.0 / depth.max(2) as f64).ceil() as usize).max(2);
    while partials.len() > 1 {
        partials = partials
            .par_chunks(scale)
            .map(|chunk| {
                chunk
                    .iter()
                    .cloned()
                    .reduce(|a, b| comb_op(a, b))
                    .expect("non-empty chunk")
            })
            .collect();
    }
    partials.pop()
}

// ============================================================================
// Keyed operations
// ============================================================================

fn bucket_of<K: Hash>(key: &K, num_partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % num_partitions as u64) as usize
}

impl<K, V> ParallelDataset<(K, V)>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Combine values per key: `seq` folds values into a per-key accumulator
    /// within each input partition, then accumulators for the same key are
    /// merged with `comb` after a shuffle into `num_partitions` partitions.
    pub fn aggregate_by_key<C, Z, S, M>(
        &self,
        zero: Z,
        seq: S,
        comb: M,
        num_partitions: usize,
    ) -> ParallelDataset<(K, C)>
    where
        C: Send,
        Z: Fn() -> C + Sync,
        S: Fn(&mut C, &V) + Sync,
        M: Fn(&mut C, C) + Sync,
    {
        let np = num_partitions.max(1);

        // Map side: per-partition local aggregation.
        let locals: Vec<DetMap<K, C>> = self
            .partitions
            .par_iter()
            .map(|part| {
                let mut acc: DetMap<K, C> = DetMap::default();
                for (k, v) in part {
                    seq(acc.entry(k.clone()).or_insert_with(&zero), v);
                }
                acc
            })
            .collect();

        // Shuffle: bucket local accumulators by key hash.
        let shuffled = shuffle(locals, np);

        // Reduce side: merge accumulators per key.
        let partitions: Vec<Vec<(K, C)>> = shuffled
            .into_par_iter()
            .map(|pairs| {
                let mut merged: DetMap<K, C> = DetMap::default();
                for (k, c) in pairs {
                    match merged.entry(k) {
                        Entry::Occupied(mut e) => comb(e.get_mut(), c),
                        Entry::Vacant(e) => {
                            e.insert(c);
                        }
                    }
                }
                merged.into_iter().collect()
            })
            .collect();

        ParallelDataset::from_partitions(partitions)
    }

    /// Inner join on key, shuffled into `num_partitions` partitions.
    pub fn join<W>(
        &self,
        other: &ParallelDataset<(K, W)>,
        num_partitions: usize,
    ) -> ParallelDataset<(K, (V, W))>
    where
        V: Clone,
        W: Clone + Send + Sync,
    {
        let np = num_partitions.max(1);

        let left = shuffle(
            self.partitions
                .par_iter()
                .map(|part| part.iter().cloned().collect::<Vec<_>>())
                .collect::<Vec<_>>(),
            np,
        );
        let right = shuffle(
            other
                .partitions
                .par_iter()
                .map(|part| part.iter().cloned().collect::<Vec<_>>())
                .collect::<Vec<_>>(),
            np,
        );

        let partitions: Vec<Vec<(K, (V, W))>> = left
            .into_par_iter()
            .zip(right.into_par_iter())
            .map(|(lhs, rhs)| {
                let mut by_key: DetMap<K, Vec<V>> = DetMap::default();
                for (k, v) in lhs {
                    by_key.entry(k).or_default().push(v);
                }
                let mut out = Vec::new();
                for (k, w) in rhs {
                    if let Some(vs) = by_key.get(&k) {
                        for v in vs {
                            out.push((k.clone(), (v.clone(), w.clone())));
                        }
                    }
                }
                out
            })
            .collect();

        ParallelDataset::from_partitions(partitions)
    }
}

/// Route every `(K, item)` pair into its hash bucket, preserving the
/// deterministic per-partition order of the inputs.
fn shuffle<K: Hash, I, E>(inputs: Vec<I>, num_partitions: usize) -> Vec<Vec<(K, E)>>
where
    I: IntoIterator<Item = (K, E)>,
{
    let mut buckets: Vec<Vec<(K, E)>> = (0..num_partitions).map(|_| Vec::new()).collect();
    for input in inputs {
        for (k, e) in input {
            let b = bucket_of(&k, num_partitions);
            buckets[b].push((k, e));
        }
    }
    buckets
}

// ============================================================================
// Checkpointing
// ============================================================================

impl<T: Serialize + Send + Sync> ParallelDataset<T> {
    /// Write one JSON file per partition under a fresh subdirectory of
    /// `dir`, returning the subdirectory path.
    pub fn checkpoint(&self, dir: &Path) -> Result<PathBuf> {
        let seq = CHECKPOINT_SEQ.fetch_add(1, Ordering::Relaxed);
        let target = dir.join(format!("ckpt-{}-{seq}", std::process::id()));
        fs::create_dir_all(&target)?;
        for (idx, part) in self.partitions.iter().enumerate() {
            let file = fs::File::create(target.join(format!("part-{idx:05}.json")))?;
            serde_json::to_writer(BufWriter::new(file), part)?;
        }
        Ok(target)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize, np: usize) -> ParallelDataset<u64> {
        ParallelDataset::from_vec((0..n as u64).collect(), np)
    }

    #[test]
    fn test_from_vec_partitioning() {
        let data = dataset(10, 3);
        assert_eq!(data.num_partitions(), 3);
        let sizes: Vec<usize> = data.partitions().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(data.collect(), (0..10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_map_filter_flat_map() {
        let data = dataset(6, 2);
        assert_eq!(data.map(|x| x * 2).collect(), vec![0, 2, 4, 6, 8, 10]);
        assert_eq!(data.filter(|x| x % 2 == 0).collect(), vec![0, 2, 4]);
        assert_eq!(
            data.flat_map(|x| vec![*x; 2]).count(),
            12
        );
    }

    #[test]
    fn test_zip_alignment() {
        let a = dataset(5, 2);
        let b = a.map(|x| x + 100);
        let zipped = a.zip(&b).collect();
        assert_eq!(zipped[3], (3, 103));
    }

    #[test]
    #[should_panic(expected = "zip requires identical partition counts")]
    fn test_zip_mismatched_partitions() {
        let a = dataset(4, 2);
        let b = dataset(4, 4);
        a.zip(&b);
    }

    #[test]
    fn test_sample_deterministic() {
        let data = dataset(1000, 4);
        let s1 = data.sample(0.3, 7).collect();
        let s2 = data.sample(0.3, 7).collect();
        assert_eq!(s1, s2);
        // Roughly a third of the elements survive.
        assert!(s1.len() > 200 && s1.len() < 400, "got {}", s1.len());
        // A different seed picks a different subset.
        assert_ne!(data.sample(0.3, 8).collect(), s1);
    }

    #[test]
    fn test_tree_aggregate_depth_invariant() {
        let data = dataset(100, 7);
        let sum = |d: usize| data.tree_aggregate(0u64, |a, x| a + x, |a, b| a + b, d);
        assert_eq!(sum(2), 4950);
        assert_eq!(sum(3), 4950);
        assert_eq!(sum(5), 4950);
    }

    #[test]
    fn test_tree_aggregate_partition_invariant() {
        for np in [1, 2, 5, 13] {
            let data = dataset(64, np);
            let total = data.tree_aggregate(0u64, |a, x| a + x, |a, b| a + b, 2);
            assert_eq!(total, 2016);
        }
    }

    #[test]
    fn test_tree_reduce() {
        let data = dataset(10, 3);
        assert_eq!(data.tree_reduce(|a, b| a.max(b), 2), Some(9));

        let empty: ParallelDataset<u64> = ParallelDataset::from_partitions(vec![vec![], vec![]]);
        assert_eq!(empty.tree_reduce(|a, b| a + b, 2), None);
    }

    #[test]
    fn test_aggregate_by_key() {
        let pairs: Vec<(u32, u64)> = vec![(1, 10), (2, 20), (1, 1), (3, 30), (2, 2), (1, 100)];
        let data = ParallelDataset::from_vec(pairs, 3);
        let mut summed: Vec<(u32, u64)> = data
            .aggregate_by_key(|| 0u64, |acc, v| *acc += v, |acc, c| *acc += c, 2)
            .collect();
        summed.sort_unstable();
        assert_eq!(summed, vec![(1, 111), (2, 22), (3, 30)]);
    }

    #[test]
    fn test_join_inner() {
        let left = ParallelDataset::from_vec(vec![(1u32, "a"), (2, "b"), (3, "c")], 2);
        let right = ParallelDataset::from_vec(vec![(2u32, 20), (3, 30), (4, 40)], 2);
        let mut joined = left.join(&right, 2).collect();
        joined.sort_unstable();
        assert_eq!(joined, vec![(2, ("b", 20)), (3, ("c", 30))]);
    }

    #[test]
    fn test_persist_flag() {
        let data = dataset(4, 1);
        assert!(!data.is_persisted());
        data.persist(StorageLevel::Memory);
        assert!(data.is_persisted());
        // Clones share the flag.
        let clone = data.clone();
        clone.unpersist();
        assert!(!data.is_persisted());
    }
}
