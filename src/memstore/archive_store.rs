//! Archive store: per-day immutable batches behind a versioned pointer.
//!
//! A version maps day → batch and is immutable once published; readers
//! snapshot the current `Arc` and keep reading it while a backfill or
//! purge assembles the next version. Superseded versions die when their
//! last reader drops the reference count.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::memstore::batch::Batch;

/// One day's immutable, sort-compressed columnar block, persisted at the
/// `(batch_version, seq)` disk coordinates.
#[derive(Debug)]
pub struct ArchiveBatch {
    pub day: i32,
    pub batch_version: u32,
    pub seq: u32,
    /// Row count.
    pub size: usize,
    pub batch: Batch,
}

/// One published day → batch mapping at a given archiving cutoff.
pub struct ArchiveStoreVersion {
    pub archiving_cutoff: u32,
    batches: RwLock<AHashMap<i32, Arc<ArchiveBatch>>>,
}

impl ArchiveStoreVersion {
    pub fn new(archiving_cutoff: u32) -> Self {
        Self { archiving_cutoff, batches: RwLock::new(AHashMap::new()) }
    }

    pub fn get_batch(&self, day: i32) -> Option<Arc<ArchiveBatch>> {
        self.batches.read().get(&day).cloned()
    }

    /// Install a batch for a day. Only the owner of the shard's archive
    /// write lock adds to the in-flight current version.
    pub fn set_batch(&self, day: i32, batch: Arc<ArchiveBatch>) {
        self.batches.write().insert(day, batch);
    }

    pub fn days(&self) -> Vec<i32> {
        let mut days: Vec<i32> = self.batches.read().keys().copied().collect();
        days.sort_unstable();
        days
    }

    pub fn batch_count(&self) -> usize {
        self.batches.read().len()
    }

    /// Copy-on-write successor with the given day batches replaced.
    pub fn with_replaced(
        &self,
        replacements: impl IntoIterator<Item = (i32, Arc<ArchiveBatch>)>,
    ) -> ArchiveStoreVersion {
        let mut batches = self.batches.read().clone();
        for (day, batch) in replacements {
            batches.insert(day, batch);
        }
        ArchiveStoreVersion {
            archiving_cutoff: self.archiving_cutoff,
            batches: RwLock::new(batches),
        }
    }

    /// Copy-on-write successor carrying the same batches at a new cutoff.
    pub fn with_cutoff(&self, cutoff: u32) -> ArchiveStoreVersion {
        ArchiveStoreVersion {
            archiving_cutoff: cutoff,
            batches: RwLock::new(self.batches.read().clone()),
        }
    }

    /// Copy-on-write successor without the days in `[start, end)`; returns
    /// the evicted batches, oldest first.
    pub fn with_purged(
        &self,
        start: i32,
        end: i32,
    ) -> (ArchiveStoreVersion, Vec<Arc<ArchiveBatch>>) {
        let current = self.batches.read();
        let mut kept = AHashMap::new();
        let mut evicted = Vec::new();
        for (&day, batch) in current.iter() {
            if day >= start && day < end {
                evicted.push(batch.clone());
            } else {
                kept.insert(day, batch.clone());
            }
        }
        evicted.sort_by_key(|b| b.day);
        (
            ArchiveStoreVersion {
                archiving_cutoff: self.archiving_cutoff,
                batches: RwLock::new(kept),
            },
            evicted,
        )
    }
}

/// Serializes purge runs on one shard and remembers the last run.
#[derive(Default)]
pub struct PurgeManager {
    pub purge_lock: Mutex<()>,
    pub last_purge_time: Mutex<Option<DateTime<Utc>>>,
}

pub struct ArchiveStore {
    current: RwLock<Arc<ArchiveStoreVersion>>,
    pub purge_manager: PurgeManager,
}

impl ArchiveStore {
    pub fn new(archiving_cutoff: u32) -> Self {
        Self {
            current: RwLock::new(Arc::new(ArchiveStoreVersion::new(archiving_cutoff))),
            purge_manager: PurgeManager::default(),
        }
    }

    /// Reader snapshot of the current version; hold the `Arc` for the
    /// duration of the read and drop it when done.
    pub fn current_version(&self) -> Arc<ArchiveStoreVersion> {
        self.current.read().clone()
    }

    /// Atomically publish `next`, returning the superseded version.
    pub fn swap_current_version(
        &self,
        next: Arc<ArchiveStoreVersion>,
    ) -> Arc<ArchiveStoreVersion> {
        std::mem::replace(&mut *self.current.write(), next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataType;
    use crate::memstore::vector_party::VectorParty;

    fn batch_of(day: i32, rows: usize) -> Arc<ArchiveBatch> {
        Arc::new(ArchiveBatch {
            day,
            batch_version: 0,
            seq: 0,
            size: rows,
            batch: Batch::new(vec![Some(Arc::new(VectorParty::new_flat(
                DataType::Uint32,
                rows,
            )))]),
        })
    }

    #[test]
    fn test_with_replaced_shares_untouched_days() {
        let v1 = ArchiveStoreVersion::new(100);
        v1.set_batch(0, batch_of(0, 2));
        v1.set_batch(1, batch_of(1, 3));
        let replacement = batch_of(1, 5);
        let v2 = v1.with_replaced([(1, replacement.clone())]);
        assert!(Arc::ptr_eq(&v1.get_batch(0).unwrap(), &v2.get_batch(0).unwrap()));
        assert!(Arc::ptr_eq(&v2.get_batch(1).unwrap(), &replacement));
        assert_eq!(v1.get_batch(1).unwrap().size, 3);
    }

    #[test]
    fn test_with_purged_range() {
        let v1 = ArchiveStoreVersion::new(100);
        for day in 0..5 {
            v1.set_batch(day, batch_of(day, 1));
        }
        let (v2, evicted) = v1.with_purged(0, 3);
        assert_eq!(evicted.iter().map(|b| b.day).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(v2.days(), vec![3, 4]);
        // source version untouched
        assert_eq!(v1.days(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_swap_keeps_prior_readable() {
        let store = ArchiveStore::new(100);
        store.current_version().set_batch(0, batch_of(0, 1));
        let reader = store.current_version();
        let next = Arc::new(reader.with_replaced([(0, batch_of(0, 9))]));
        let prior = store.swap_current_version(next);
        // the old reader still sees the old batch
        assert_eq!(reader.get_batch(0).unwrap().size, 1);
        assert!(Arc::ptr_eq(&prior, &reader));
        assert_eq!(store.current_version().get_batch(0).unwrap().size, 9);
    }
}
