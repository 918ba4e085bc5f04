//! Re-archive: turning a backfilled day back into a fully sort-compressed
//! archive batch and publishing it as a new store version.
//!
//! The staged rows of a backfill store are ordered into an
//! [`ArchivingPatch`] and merged with the surviving base rows by a two-way
//! merge on the archiving sort columns (ties broken by primary key, so
//! the output order is total and deterministic). Persisted column files
//! are keyed by `(batch_version, seq)`; the metastore add is the commit
//! point and every disk call is idempotent on those coordinates, which is
//! what makes the retry policy safe.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crate::data::{DataValue, RecordID};
use crate::memstore::archive_store::ArchiveBatch;
use crate::memstore::backfill::{BackfillContext, BackfillPatch, BackfillReportFn};
use crate::memstore::batch::Batch;
use crate::memstore::live_store::{LiveStore, LiveStoreSnapshot};
use crate::memstore::vector_party::{FlatBuilder, SortCompressedBuilder, VectorParty};
use crate::memstore::TableShard;
use crate::scheduler::job_detail::PurgeJobDetail;
use crate::schema::TableSchema;
use crate::utils;
use crate::Result;

/// Mutates one purge job's detail under the owning manager's lock.
pub type PurgeReportFn<'a> = &'a dyn Fn(&str, &mut dyn FnMut(&mut PurgeJobDetail));

// ============================================================================
// Archiving patch
// ============================================================================

/// The staged rows of one backfill store, ordered by the archiving sort
/// columns (stable by primary key on ties), ready to merge.
pub struct ArchivingPatch<'a> {
    pub record_ids: Vec<RecordID>,
    snapshot: LiveStoreSnapshot<'a>,
}

impl<'a> LiveStoreSnapshot<'a> {
    /// Order the snapshot's rows for the re-archive merge.
    pub fn create_archiving_patch(
        self,
        sort_columns: &[usize],
        primary_key_columns: &[usize],
    ) -> ArchivingPatch<'a> {
        let mut record_ids = self.record_ids();
        let store = self.store();
        record_ids.sort_by(|&a, &b| {
            compare_store_rows(store, a, b, sort_columns, primary_key_columns)
        });
        ArchivingPatch { record_ids, snapshot: self }
    }
}

impl<'a> ArchivingPatch<'a> {
    pub fn len(&self) -> usize {
        self.record_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_ids.is_empty()
    }

    fn value(&self, patch_row: usize, col: usize) -> DataValue {
        self.snapshot
            .store()
            .get_data_value(self.record_ids[patch_row], col)
    }
}

fn compare_store_rows(
    store: &LiveStore,
    a: RecordID,
    b: RecordID,
    sort_columns: &[usize],
    primary_key_columns: &[usize],
) -> std::cmp::Ordering {
    for &col in sort_columns.iter().chain(primary_key_columns) {
        let ord = store
            .get_data_value(a, col)
            .sort_cmp(&store.get_data_value(b, col));
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}

// ============================================================================
// Merge
// ============================================================================

enum ColumnBuilder {
    Skip,
    Sorted(SortCompressedBuilder),
    Flat(FlatBuilder),
}

impl ColumnBuilder {
    fn append(&mut self, value: &DataValue) {
        match self {
            ColumnBuilder::Skip => {}
            ColumnBuilder::Sorted(b) => b.append(value),
            ColumnBuilder::Flat(b) => b.append(value),
        }
    }

    fn finish(self) -> Option<Arc<VectorParty>> {
        match self {
            ColumnBuilder::Skip => None,
            ColumnBuilder::Sorted(b) => Some(Arc::new(b.finish())),
            ColumnBuilder::Flat(b) => Some(Arc::new(b.finish())),
        }
    }
}

/// Merge the surviving base rows with an archiving patch into a fully
/// sort-compressed archive batch. Rows in `base_row_deleted` are skipped;
/// sort columns compress, everything else (lists included) stays flat.
pub fn merge_archive_batch(
    new_columns: &[Option<Arc<VectorParty>>],
    base_size: usize,
    base_row_deleted: &BTreeSet<usize>,
    patch: &ArchivingPatch,
    schema: &TableSchema,
    day: i32,
    batch_version: u32,
    seq: u32,
) -> ArchiveBatch {
    let column_count = schema.column_count();
    let deletions = schema.column_deletions();
    let mut builders: Vec<ColumnBuilder> = (0..column_count)
        .map(|col| {
            if deletions[col] {
                ColumnBuilder::Skip
            } else if schema.is_sort_column(col) {
                ColumnBuilder::Sorted(SortCompressedBuilder::new(
                    schema.value_type_by_column[col],
                ))
            } else {
                ColumnBuilder::Flat(FlatBuilder::new(schema.value_type_by_column[col]))
            }
        })
        .collect();

    let base_value = |row: usize, col: usize| -> DataValue {
        match &new_columns[col] {
            Some(vp) => vp.get(row),
            None => DataValue::Null,
        }
    };
    let compare_base_patch = |base_row: usize, patch_row: usize| -> std::cmp::Ordering {
        for &col in schema
            .archiving_sort_columns
            .iter()
            .chain(&schema.primary_key_columns)
        {
            let ord = base_value(base_row, col).sort_cmp(&patch.value(patch_row, col));
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    };

    let mut base_rows = (0..base_size).filter(|row| !base_row_deleted.contains(row));
    let mut next_base = base_rows.next();
    let mut patch_row = 0usize;
    let mut size = 0usize;

    loop {
        let take_base = match (next_base, patch_row < patch.len()) {
            (Some(base_row), true) => {
                compare_base_patch(base_row, patch_row) != std::cmp::Ordering::Greater
            }
            (Some(_), false) => true,
            (None, true) => false,
            (None, false) => break,
        };
        if take_base {
            let base_row = next_base.expect("base cursor checked above");
            for (col, builder) in builders.iter_mut().enumerate() {
                builder.append(&base_value(base_row, col));
            }
            next_base = base_rows.next();
        } else {
            for (col, builder) in builders.iter_mut().enumerate() {
                builder.append(&patch.value(patch_row, col));
            }
            patch_row += 1;
        }
        size += 1;
    }

    let columns = builders.into_iter().map(ColumnBuilder::finish).collect();
    ArchiveBatch { day, batch_version, seq, size, batch: Batch::new(columns) }
}

// ============================================================================
// Shard-level re-archive, purge and cutoff publication
// ============================================================================

impl TableShard {
    fn empty_base(&self, day: i32) -> Arc<ArchiveBatch> {
        Arc::new(ArchiveBatch {
            day,
            batch_version: 0,
            seq: 0,
            size: 0,
            batch: Batch::new(vec![None; self.schema.column_count()]),
        })
    }

    /// Persist one merged day batch and record it in the metastore. The
    /// metastore add is the commit point; everything before it is
    /// idempotent on `(batch_version, seq)`.
    fn persist_archive_batch(&self, merged: &ArchiveBatch) -> Result<()> {
        let table = self.schema.name.as_str();
        for (col, vp) in merged.batch.columns.iter().enumerate() {
            let vp = match vp {
                Some(vp) => vp,
                None => continue,
            };
            utils::with_retries("vector party write", || {
                let mut writer = self.disk_store.open_vector_party_file_for_write(
                    table,
                    self.shard_id,
                    merged.day,
                    col,
                    merged.batch_version,
                    merged.seq,
                )?;
                vp.write_to(&mut writer)?;
                writer.sync()?;
                writer.close()
            })?;
        }
        utils::with_retries("archive batch version commit", || {
            self.meta_store.add_archive_batch_version(
                table,
                self.shard_id,
                merged.day,
                merged.batch_version,
                merged.seq,
                merged.size,
            )
        })
    }

    /// Merge every day's backfill patch into a new archive store version
    /// and publish it. Readers of the prior version are unaffected; the
    /// swap is atomic and the prior version dies with its last reader.
    pub fn create_new_archive_store_version_for_backfill(
        &self,
        patches: &BTreeMap<i32, BackfillPatch>,
        report: BackfillReportFn,
        job_key: &str,
    ) -> Result<()> {
        let lock_start = Instant::now();
        let _write_guard = self.archive_write_lock.lock();
        let current = self.archive_store.current_version();

        let total_days = patches.len() as u32;
        let total_records: usize = patches.values().map(|p| p.record_ids.len()).sum();
        report(job_key, &mut |detail| {
            detail.job.stage = "apply patch".into();
            detail.job.total = total_days;
            detail.job.num_records = total_records;
            detail.job.num_affected_days = total_days;
        });

        let mut replaced = Vec::with_capacity(patches.len());
        for (done, (&day, patch)) in patches.iter().enumerate() {
            let prior = current.get_batch(day);
            let base = prior.clone().unwrap_or_else(|| self.empty_base(day));

            let mut ctx = BackfillContext::new(
                base.clone(),
                patch,
                self.schema.clone(),
                self.host_memory.clone(),
            );
            ctx.backfill(report, job_key)?;

            let (new_columns, base_row_deleted, mut store) = ctx.into_merge_inputs();
            store.advance_last_read_record();
            let archiving_patch = store.snapshot().create_archiving_patch(
                &self.schema.archiving_sort_columns,
                &self.schema.primary_key_columns,
            );
            let merged = merge_archive_batch(
                &new_columns,
                base.size,
                &base_row_deleted,
                &archiving_patch,
                &self.schema,
                day,
                base.batch_version,
                base.seq + 1,
            );
            log::debug!(
                "backfilled day {} of {} shard {}: {} rows, {} tombstoned, {} staged",
                day,
                self.schema.name,
                self.shard_id,
                merged.size,
                base_row_deleted.len(),
                archiving_patch.len()
            );

            self.persist_archive_batch(&merged)?;
            if prior.is_some() {
                utils::with_retries("superseded batch delete", || {
                    self.disk_store.delete_batch_versions(
                        &self.schema.name,
                        self.shard_id,
                        day,
                        base.batch_version,
                        base.seq,
                    )
                })?;
            }
            replaced.push((day, Arc::new(merged)));

            let done = done as u32 + 1;
            report(job_key, &mut |detail| {
                detail.job.current = done;
            });
        }

        let next = Arc::new(current.with_replaced(replaced));
        self.archive_store.swap_current_version(next);
        let lock_ms = lock_start.elapsed().as_millis() as u64;
        report(job_key, &mut |detail| {
            detail.job.lock_duration_ms = lock_ms;
        });
        log::info!(
            "published backfill version for {} shard {}: {} days",
            self.schema.name,
            self.shard_id,
            total_days
        );
        Ok(())
    }

    /// Evict archive batches with `batch_id_start <= day < batch_id_end`
    /// behind a copy-on-write version swap, then drop their disk files.
    pub fn purge_archive_batches(
        &self,
        batch_id_start: i32,
        batch_id_end: i32,
        report: PurgeReportFn,
        job_key: &str,
    ) -> Result<usize> {
        let _purge_guard = self.archive_store.purge_manager.purge_lock.lock();
        let _write_guard = self.archive_write_lock.lock();
        let current = self.archive_store.current_version();
        let (next, evicted) = current.with_purged(batch_id_start, batch_id_end);
        if evicted.is_empty() {
            return Ok(0);
        }
        self.archive_store.swap_current_version(Arc::new(next));

        for batch in &evicted {
            utils::with_retries("purged batch delete", || {
                self.disk_store.delete_batch_versions(
                    &self.schema.name,
                    self.shard_id,
                    batch.day,
                    batch.batch_version,
                    batch.seq,
                )
            })?;
        }
        *self.archive_store.purge_manager.last_purge_time.lock() = Some(utils::now());
        let purged = evicted.len();
        report(job_key, &mut |detail| {
            detail.num_batches = purged as u32;
            detail.job.stage = "purge".into();
        });
        log::info!(
            "purged {} day batches of {} shard {} in [{}, {}]",
            purged,
            self.schema.name,
            self.shard_id,
            batch_id_start,
            batch_id_end
        );
        Ok(purged)
    }

    /// Publish a new archiving cutoff. The metastore write rolls forward:
    /// it is retried until it lands and never reverted. Holding the
    /// archive write lock orders the cutoff ahead of any backfill that
    /// would consume rows below it.
    pub fn advance_archiving_cutoff(&self, cutoff: u32) -> Result<()> {
        let _write_guard = self.archive_write_lock.lock();
        utils::with_retries("archiving cutoff publication", || {
            self.meta_store
                .update_archiving_cutoff(&self.schema.name, self.shard_id, cutoff)
        })?;
        let current = self.archive_store.current_version();
        if cutoff > current.archiving_cutoff {
            let next = Arc::new(current.with_cutoff(cutoff));
            self.archive_store.swap_current_version(next);
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataValue, BASE_BATCH_ID};
    use crate::memstore::backfill::{create_backfill_patches, BackfillContext};
    use crate::memstore::host_memory::HostMemoryManager;
    use crate::memstore::test_factory::{
        arr, backfill_patch, backfill_schema, backfill_upsert_batches, base_archive_batch,
        flat_array, flat_uint32, uint, FakeMetaStore, SharedFakeDiskStore,
    };
    use crate::scheduler::job_detail::BackfillJobDetail;
    use crate::StoreError;
    use parking_lot::Mutex;

    fn null_backfill_report() -> impl Fn(&str, &mut dyn FnMut(&mut BackfillJobDetail)) {
        |_: &str, _: &mut dyn FnMut(&mut BackfillJobDetail)| {}
    }

    /// The twelve merged rows of the canonical patch, in archive order.
    fn expected_merged_batch() -> Batch {
        Batch::new(vec![
            Some(flat_uint32(&[1, 1, 1, 1, 2, 2, 2, 2, 2, 2, 3, 1].map(Some))),
            Some(flat_uint32(&[0, 0, 0, 0, 1, 1, 1, 2, 2, 2, 5, 9].map(Some))),
            Some(flat_uint32(&[0, 1, 2, 3, 1, 0, 2, 1, 0, 2, 5, 9].map(Some))),
            None,
            Some(flat_uint32(&[
                Some(1),
                Some(1),
                Some(12),
                Some(13),
                Some(3),
                Some(30),
                Some(31),
                Some(5),
                Some(32),
                Some(33),
                Some(41),
                None,
            ])),
            Some(flat_uint32(&[10, 11, 11, 11, 12, 15, 15, 14, 16, 16, 31, 20].map(Some))),
            Some(flat_array(&[
                Some(&[1, 2]),
                Some(&[11, 12]),
                None,
                Some(&[3]),
                Some(&[21, 22]),
                Some(&[31]),
                Some(&[32]),
                None,
                Some(&[33]),
                Some(&[34]),
                Some(&[43]),
                None,
            ])),
        ])
    }

    fn run_canonical_backfill<'a>(
        patch: &'a crate::memstore::backfill::BackfillPatch,
    ) -> BackfillContext<'a> {
        let mut ctx = BackfillContext::new(
            base_archive_batch(),
            patch,
            backfill_schema(),
            Arc::new(HostMemoryManager::new(1 << 32)),
        );
        let report = null_backfill_report();
        ctx.backfill(&report, "k").unwrap();
        ctx
    }

    #[test]
    fn test_create_archiving_patch() {
        let patch = backfill_patch(backfill_upsert_batches());
        let ctx = run_canonical_backfill(&patch);
        let schema = backfill_schema();
        let (_, _, mut store) = ctx.into_merge_inputs();
        store.advance_last_read_record();
        let ap = store.snapshot().create_archiving_patch(
            &schema.archiving_sort_columns,
            &schema.primary_key_columns,
        );
        assert_eq!(store.batches.len(), 1);
        assert_eq!(ap.len(), 7);
        // staged rows ordered by (sort columns, primary key)
        let expected: Vec<RecordID> = [0u32, 2, 3, 4, 5, 6, 1]
            .iter()
            .map(|&i| RecordID::new(BASE_BATCH_ID, i))
            .collect();
        assert_eq!(ap.record_ids, expected);
    }

    #[test]
    fn test_merge_archive_batch() {
        let patch = backfill_patch(backfill_upsert_batches());
        let ctx = run_canonical_backfill(&patch);
        let schema = backfill_schema();
        let (new_columns, deleted, mut store) = ctx.into_merge_inputs();
        store.advance_last_read_record();
        let ap = store.snapshot().create_archiving_patch(
            &schema.archiving_sort_columns,
            &schema.primary_key_columns,
        );
        let merged = merge_archive_batch(&new_columns, 10, &deleted, &ap, &schema, 0, 0, 1);

        assert_eq!(merged.size, 12);
        assert_eq!(merged.seq, 1);
        assert!(merged.batch.equals(&expected_merged_batch()));

        // sort columns come back compressed, everything else flat
        assert!(merged.batch.columns[1].as_ref().unwrap().is_sort_compressed());
        assert!(merged.batch.columns[5].as_ref().unwrap().is_sort_compressed());
        assert!(!merged.batch.columns[0].as_ref().unwrap().is_sort_compressed());
        assert!(!merged.batch.columns[6].as_ref().unwrap().is_sort_compressed());

        // rows are non-decreasing on (column 1, column 5)
        for row in 1..merged.size {
            let prev = (
                merged.batch.get_data_value(row - 1, 1),
                merged.batch.get_data_value(row - 1, 5),
            );
            let cur = (
                merged.batch.get_data_value(row, 1),
                merged.batch.get_data_value(row, 5),
            );
            let ord = prev.0.sort_cmp(&cur.0).then(prev.1.sort_cmp(&cur.1));
            assert_ne!(ord, std::cmp::Ordering::Greater, "row {} out of order", row);
        }
    }

    #[test]
    fn test_merge_with_empty_patch_drops_tombstones_only() {
        let empty_patch = crate::memstore::backfill::BackfillPatch {
            day: 0,
            record_ids: vec![],
            backfill_batches: Arc::new(vec![]),
        };
        let ctx = run_canonical_backfill(&empty_patch);
        let schema = backfill_schema();
        let (new_columns, _, mut store) = ctx.into_merge_inputs();
        store.advance_last_read_record();
        let ap = store.snapshot().create_archiving_patch(
            &schema.archiving_sort_columns,
            &schema.primary_key_columns,
        );
        let mut deleted = BTreeSet::new();
        deleted.insert(0usize);
        deleted.insert(9usize);
        let merged = merge_archive_batch(&new_columns, 10, &deleted, &ap, &schema, 0, 0, 1);
        assert_eq!(merged.size, 8);
        assert_eq!(merged.batch.get_data_value(0, 2), uint(1));
        assert_eq!(merged.batch.get_data_value(7, 2), uint(1));
    }

    fn shard_with_fakes() -> (Arc<TableShard>, Arc<SharedFakeDiskStore>, Arc<FakeMetaStore>) {
        let disk = Arc::new(SharedFakeDiskStore::new());
        let meta = Arc::new(FakeMetaStore::default());
        let shard = Arc::new(TableShard::new(
            backfill_schema(),
            meta.clone(),
            disk.clone(),
            Arc::new(HostMemoryManager::new(1 << 32)),
            0,
        ));
        (shard, disk, meta)
    }

    #[test]
    fn test_create_new_archive_store_version_for_backfill() {
        let (shard, disk, meta) = shard_with_fakes();
        shard
            .archive_store
            .current_version()
            .set_batch(0, base_archive_batch());
        let reader = shard.archive_store.current_version();

        let detail = Mutex::new(BackfillJobDetail::default());
        let report = |_: &str, mutate: &mut dyn FnMut(&mut BackfillJobDetail)| {
            mutate(&mut detail.lock());
        };
        let patches = create_backfill_patches(backfill_upsert_batches(), &report, "k").unwrap();
        shard
            .create_new_archive_store_version_for_backfill(&patches, &report, "k")
            .unwrap();

        // commit recorded at (version 0, seq 1) with the merged row count
        assert_eq!(
            meta.versions.lock().clone(),
            vec![("test".to_string(), 0, 0, 0, 1, 12)]
        );
        // superseded (version 0, seq 0) files dropped
        assert_eq!(
            disk.deletes.lock().clone(),
            vec![("test".to_string(), 0, 0, 0, 0)]
        );
        // one file per live column at the new coordinates; none for the
        // deleted column 3
        let keys = disk.file_keys();
        for col in [0usize, 1, 2, 4, 5, 6] {
            assert!(keys.contains(&format!("test/0/0/{}@0:1", col)), "missing col {}", col);
        }
        assert!(!keys.iter().any(|k| k.starts_with("test/0/0/3@")));

        // the new version is live and correct; the old reader still sees
        // the 10-row base
        let published = shard.archive_store.current_version().get_batch(0).unwrap();
        assert_eq!(published.size, 12);
        assert!(published.batch.equals(&expected_merged_batch()));
        assert_eq!(reader.get_batch(0).unwrap().size, 10);

        let got = detail.lock().clone();
        assert_eq!(got.job.current, 1);
        assert_eq!(got.job.total, 1);
        assert_eq!(got.job.num_records, 13);
        assert_eq!(got.job.num_affected_days, 1);
        assert_eq!(got.job.stage, "apply patch");
    }

    #[test]
    fn test_rearchive_retries_transient_disk_errors() {
        let (shard, disk, meta) = shard_with_fakes();
        shard
            .archive_store
            .current_version()
            .set_batch(0, base_archive_batch());
        *disk.fail_opens.lock() = 1;

        let report = null_backfill_report();
        let patches = create_backfill_patches(backfill_upsert_batches(), &report, "k").unwrap();
        shard
            .create_new_archive_store_version_for_backfill(&patches, &report, "k")
            .unwrap();
        assert_eq!(meta.versions.lock().len(), 1);
    }

    #[test]
    fn test_rearchive_fails_after_exhausted_retries() {
        let (shard, disk, meta) = shard_with_fakes();
        shard
            .archive_store
            .current_version()
            .set_batch(0, base_archive_batch());
        *disk.fail_opens.lock() = 10;
        let reader = shard.archive_store.current_version();

        let report = null_backfill_report();
        let patches = create_backfill_patches(backfill_upsert_batches(), &report, "k").unwrap();
        let err = shard
            .create_new_archive_store_version_for_backfill(&patches, &report, "k")
            .unwrap_err();
        assert!(matches!(err, StoreError::DiskIo(_)));
        assert!(meta.versions.lock().is_empty());
        // previous version stays installed
        assert!(Arc::ptr_eq(&shard.archive_store.current_version(), &reader));
    }

    #[test]
    fn test_purge_archive_batches() {
        let (shard, disk, _meta) = shard_with_fakes();
        let version = shard.archive_store.current_version();
        for day in 0..5 {
            let batch = base_archive_batch();
            version.set_batch(
                day,
                Arc::new(ArchiveBatch {
                    day,
                    batch_version: 7,
                    seq: 0,
                    size: batch.size,
                    batch: batch.batch.clone(),
                }),
            );
        }

        let detail = Mutex::new(PurgeJobDetail::default());
        let report = |_: &str, mutate: &mut dyn FnMut(&mut PurgeJobDetail)| {
            mutate(&mut detail.lock());
        };
        let purged = shard.purge_archive_batches(0, 3, &report, "k").unwrap();
        assert_eq!(purged, 3);
        assert_eq!(shard.archive_store.current_version().days(), vec![3, 4]);
        assert_eq!(disk.deletes.lock().len(), 3);
        assert_eq!(detail.lock().num_batches, 3);
        assert!(shard
            .archive_store
            .purge_manager
            .last_purge_time
            .lock()
            .is_some());

        // purging an already-empty range is a no-op
        let purged = shard.purge_archive_batches(0, 3, &report, "k").unwrap();
        assert_eq!(purged, 0);
    }

    #[test]
    fn test_advance_archiving_cutoff_rolls_forward() {
        let (shard, _disk, meta) = shard_with_fakes();
        *meta.fail_cutoffs.lock() = 1;
        shard.advance_archiving_cutoff(5000).unwrap();
        // one scripted failure, then the retried write landed
        assert_eq!(meta.cutoffs.lock().clone(), vec![("test".to_string(), 0, 5000)]);
        assert_eq!(shard.archive_store.current_version().archiving_cutoff, 5000);
    }

    #[test]
    fn test_staged_array_values_survive_merge() {
        let patch = backfill_patch(backfill_upsert_batches());
        let ctx = run_canonical_backfill(&patch);
        let schema = backfill_schema();
        let (new_columns, deleted, mut store) = ctx.into_merge_inputs();
        store.advance_last_read_record();
        let ap = store.snapshot().create_archiving_patch(
            &schema.archiving_sort_columns,
            &schema.primary_key_columns,
        );
        let merged = merge_archive_batch(&new_columns, 10, &deleted, &ap, &schema, 0, 0, 1);
        // the in-place array rewrite and a staged array both round-trip
        assert_eq!(merged.batch.get_data_value(4, 6), arr(&[21, 22]));
        assert_eq!(merged.batch.get_data_value(10, 6), arr(&[43]));
        assert_eq!(merged.batch.get_data_value(11, 6), DataValue::Null);
    }
}

