//! Lineage-truncation helper for the per-tree training loop.
//!
//! Each level of tree growth re-derives the node-id and histogram datasets.
//! The [`Checkpointer`] keeps the last few materializations pinned in
//! memory and periodically writes a checkpoint to disk so an external
//! shuffle engine could truncate lineage. Checkpoint file deletion runs on
//! a detached thread and never blocks the loop; all checkpoint I/O failures
//! are logged and swallowed.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::thread;

use serde::Serialize;

use crate::config::StorageLevel;
use crate::data::ParallelDataset;

/// Type-erased handle pinning a persisted dataset in memory.
trait PinnedDataset: Send {
    fn unpersist(&self);
}

impl<T: Send + Sync> PinnedDataset for ParallelDataset<T> {
    fn unpersist(&self) {
        ParallelDataset::unpersist(self);
    }
}

// ============================================================================
// Checkpointer
// ============================================================================

/// Maintains two FIFO queues over the datasets produced during tree growth:
///
/// - persisted datasets, at most 3; pushing a fourth unpersists and drops
///   the oldest;
/// - checkpoint directories, where the previous checkpoint is deleted as
///   soon as the next one has materialized.
///
/// `checkpoint_interval = -1` disables checkpoint writes entirely; a
/// missing checkpoint directory does the same.
pub struct Checkpointer {
    interval: i32,
    storage_level: StorageLevel,
    checkpoint_dir: Option<PathBuf>,
    update_count: u32,
    persisted: VecDeque<Box<dyn PinnedDataset>>,
    checkpoints: VecDeque<PathBuf>,
}

impl Checkpointer {
    /// Maximum number of datasets kept pinned at once.
    const MAX_PERSISTED: usize = 3;

    /// Create a checkpointer.
    pub fn new(
        checkpoint_interval: i32,
        storage_level: StorageLevel,
        checkpoint_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            interval: checkpoint_interval,
            storage_level,
            checkpoint_dir,
            update_count: 0,
            persisted: VecDeque::new(),
            checkpoints: VecDeque::new(),
        }
    }

    /// Number of datasets currently pinned.
    pub fn num_persisted(&self) -> usize {
        self.persisted.len()
    }

    /// Checkpoint directories currently on disk, oldest first.
    pub fn checkpoint_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.checkpoints.iter()
    }

    /// Register a freshly derived dataset.
    ///
    /// Persists it if needed, evicts the oldest pinned dataset beyond the
    /// queue bound, and every `interval` updates writes a checkpoint and
    /// schedules deletion of the previous one.
    pub fn update<T>(&mut self, data: &ParallelDataset<T>)
    where
        T: Serialize + Send + Sync + 'static,
    {
        if !data.is_persisted() {
            data.persist(self.storage_level);
        }
        self.persisted.push_back(Box::new(data.clone()));
        while self.persisted.len() > Self::MAX_PERSISTED {
            if let Some(old) = self.persisted.pop_front() {
                old.unpersist();
            }
        }

        self.update_count += 1;
        if self.interval <= 0 || self.update_count % self.interval as u32 != 0 {
            return;
        }
        let Some(dir) = self.checkpoint_dir.clone() else {
            return;
        };

        match data.checkpoint(&dir) {
            Ok(path) => {
                self.checkpoints.push_back(path);
                // The new checkpoint exists; older ones are now redundant.
                while self.checkpoints.len() > 1 {
                    if let Some(old) = self.checkpoints.pop_front() {
                        delete_async(old);
                    }
                }
            }
            Err(err) => {
                log::warn!("checkpoint write failed, continuing without: {err}");
            }
        }
    }

    /// Unpin every dataset still in the persisted queue.
    pub fn unpersist_all(&mut self) {
        while let Some(old) = self.persisted.pop_front() {
            old.unpersist();
        }
    }

    /// Schedule deletion of every checkpoint directory still on disk.
    pub fn delete_all_checkpoints(&mut self) {
        while let Some(old) = self.checkpoints.pop_front() {
            delete_async(old);
        }
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        self.unpersist_all();
        self.delete_all_checkpoints();
    }
}

/// Remove a checkpoint directory on a detached thread, logging on failure.
fn delete_async(path: PathBuf) {
    thread::spawn(move || {
        if let Err(err) = fs::remove_dir_all(&path) {
            log::warn!("failed to delete checkpoint {}: {err}", path.display());
        }
    });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: u64) -> ParallelDataset<u64> {
        ParallelDataset::from_vec((0..n).collect(), 2)
    }

    #[test]
    fn test_persist_queue_bounded() {
        let mut ckpt = Checkpointer::new(-1, StorageLevel::Memory, None);
        let datasets: Vec<_> = (0..5).map(|i| dataset(i + 1)).collect();

        for d in &datasets {
            ckpt.update(d);
        }
        assert_eq!(ckpt.num_persisted(), 3);

        // The two oldest datasets were unpersisted on overflow.
        assert!(!datasets[0].is_persisted());
        assert!(!datasets[1].is_persisted());
        assert!(datasets[2].is_persisted());
        assert!(datasets[4].is_persisted());
    }

    #[test]
    fn test_unpersist_all() {
        let mut ckpt = Checkpointer::new(-1, StorageLevel::Memory, None);
        let d = dataset(3);
        ckpt.update(&d);
        assert!(d.is_persisted());
        ckpt.unpersist_all();
        assert!(!d.is_persisted());
        assert_eq!(ckpt.num_persisted(), 0);
    }

    #[test]
    fn test_checkpoint_every_interval() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ckpt =
            Checkpointer::new(2, StorageLevel::Memory, Some(tmp.path().to_path_buf()));

        let d = dataset(4);
        ckpt.update(&d);
        assert_eq!(ckpt.checkpoint_paths().count(), 0);

        ckpt.update(&d);
        let paths: Vec<_> = ckpt.checkpoint_paths().cloned().collect();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].join("part-00000.json").exists());

        // A second checkpoint replaces the first in the queue.
        ckpt.update(&d);
        ckpt.update(&d);
        assert_eq!(ckpt.checkpoint_paths().count(), 1);
        let newest: Vec<_> = ckpt.checkpoint_paths().cloned().collect();
        assert_ne!(newest[0], paths[0]);
    }

    #[test]
    fn test_interval_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ckpt =
            Checkpointer::new(-1, StorageLevel::Memory, Some(tmp.path().to_path_buf()));
        let d = dataset(4);
        for _ in 0..10 {
            ckpt.update(&d);
        }
        assert_eq!(ckpt.checkpoint_paths().count(), 0);
    }

    #[test]
    fn test_missing_dir_created_on_demand() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let mut ckpt = Checkpointer::new(1, StorageLevel::Memory, Some(nested.clone()));
        ckpt.update(&dataset(2));
        assert_eq!(ckpt.checkpoint_paths().count(), 1);
        assert!(nested.exists());
    }
}
