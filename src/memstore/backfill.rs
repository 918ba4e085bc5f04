//! Backfill: merging out-of-order upserts into archived day partitions.
//!
//! Incoming upsert batches partition by day into [`BackfillPatch`]es; a
//! [`BackfillContext`] then merges one patch against its day's archive
//! batch. The context never touches the base batch: unsorted-column
//! updates fork the touched column onto the new batch (copy-on-write,
//! once per column), while inserts and updates that move a sort key go to
//! a staging store and are re-sorted into place by the re-archive merge.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap;

use crate::data::{day_of_timestamp, DataValue, RecordID};
use crate::memstore::archive_store::ArchiveBatch;
use crate::memstore::host_memory::{HostMemoryManager, MemoryTracker};
use crate::memstore::live_store::{new_backfill_store, LiveStore};
use crate::memstore::upsert_batch::UpsertBatch;
use crate::memstore::vector_party::VectorParty;
use crate::memstore::{batch::Batch, BACKFILL_REPORT_INTERVAL_ROWS};
use crate::scheduler::job_detail::BackfillJobDetail;
use crate::schema::TableSchema;
use crate::{Result, StoreError};

/// Mutates one job's detail under the owning manager's lock. The first
/// argument is the job key.
pub type BackfillReportFn<'a> = &'a dyn Fn(&str, &mut dyn FnMut(&mut BackfillJobDetail));

/// The upsert rows of one shard targeting one day, in discovery order.
#[derive(Debug)]
pub struct BackfillPatch {
    pub day: i32,
    /// `(input batch index, row)` locators into `backfill_batches`.
    pub record_ids: Vec<RecordID>,
    /// All input batches, shared across every patch of the run so a
    /// record id addresses the same space regardless of day.
    pub backfill_batches: Arc<Vec<UpsertBatch>>,
}

impl BackfillPatch {
    fn batch(&self, rid: RecordID) -> Result<&UpsertBatch> {
        self.backfill_batches
            .get(rid.batch_id as usize)
            .ok_or_else(|| {
                StoreError::InvalidUpsertRow(format!("patch batch {} out of range", rid.batch_id))
            })
    }
}

/// Partition upsert batches by the day of their time column (schema
/// column 0), preserving `(batch, row)` discovery order within each day.
pub fn create_backfill_patches(
    batches: Vec<UpsertBatch>,
    report: BackfillReportFn,
    job_key: &str,
) -> Result<BTreeMap<i32, BackfillPatch>> {
    let shared = Arc::new(batches);
    let mut record_ids_by_day: BTreeMap<i32, Vec<RecordID>> = BTreeMap::new();
    let mut num_records = 0usize;

    for (batch_idx, batch) in shared.iter().enumerate() {
        let time_col = (0..batch.column_count())
            .find(|&idx| batch.column_id(idx) == 0)
            .ok_or_else(|| {
                StoreError::InvalidUpsertRow("upsert batch is missing the time column".into())
            })?;
        for row in 0..batch.row_count() {
            let ts = batch
                .get_value(row, time_col)?
                .as_u32()
                .ok_or_else(|| {
                    StoreError::InvalidUpsertRow(format!(
                        "row {} of batch {} has no valid timestamp",
                        row, batch_idx
                    ))
                })?;
            record_ids_by_day
                .entry(day_of_timestamp(ts))
                .or_default()
                .push(RecordID::new(batch_idx as i32, row as u32));
            num_records += 1;
        }
        let days = record_ids_by_day.len() as u32;
        report(job_key, &mut |detail| {
            detail.job.stage = "create patch".into();
            detail.job.current = days;
            detail.job.total = days;
            detail.job.num_records = num_records;
        });
    }

    Ok(record_ids_by_day
        .into_iter()
        .map(|(day, record_ids)| {
            (day, BackfillPatch { day, record_ids, backfill_batches: shared.clone() })
        })
        .collect())
}

// ============================================================================
// Backfill context
// ============================================================================

/// Per-patch merge state against one base archive batch.
///
/// Dropping the context releases the staging store and refunds every byte
/// it charged to the host memory manager.
pub struct BackfillContext<'a> {
    pub base: Arc<ArchiveBatch>,
    pub patch: &'a BackfillPatch,
    /// Column handles of the batch being assembled; aliases of `base`
    /// until the column is forked.
    new_columns: Vec<Option<Arc<VectorParty>>>,
    pub columns_forked: Vec<bool>,
    /// Base rows superseded by this patch, tombstoned at re-archive.
    pub base_row_deleted: BTreeSet<usize>,
    pub backfill_store: LiveStore,
    schema: Arc<TableSchema>,
    column_deletions: Vec<bool>,
    /// Sort-order primary-key index over the base batch, built lazily
    /// once per context.
    base_pk: Option<AHashMap<Vec<u8>, usize>>,
    tracker: MemoryTracker,
}

impl<'a> BackfillContext<'a> {
    pub fn new(
        base: Arc<ArchiveBatch>,
        patch: &'a BackfillPatch,
        schema: Arc<TableSchema>,
        host_memory: Arc<HostMemoryManager>,
    ) -> Self {
        let column_count = schema.column_count();
        let mut new_columns = base.batch.columns.clone();
        new_columns.resize(column_count, None);
        let backfill_store = new_backfill_store(&schema, host_memory.clone());
        let column_deletions = schema.column_deletions();
        Self {
            base,
            patch,
            new_columns,
            columns_forked: vec![false; column_count],
            base_row_deleted: BTreeSet::new(),
            backfill_store,
            schema,
            column_deletions,
            base_pk: None,
            tracker: MemoryTracker::new(host_memory),
        }
    }

    /// The assembled batch's column handle, for pointer inspection.
    pub fn new_column(&self, col: usize) -> Option<&Arc<VectorParty>> {
        self.new_columns[col].as_ref()
    }

    /// Snapshot of the assembled batch.
    pub fn new_batch(&self) -> Batch {
        Batch::new(self.new_columns.clone())
    }

    /// Consume the context, yielding the assembled columns and staging
    /// store for the re-archive merge.
    pub(crate) fn into_merge_inputs(self) -> (Vec<Option<Arc<VectorParty>>>, BTreeSet<usize>, LiveStore) {
        (self.new_columns, self.base_row_deleted, self.backfill_store)
    }

    fn new_value(&self, row: usize, col: usize) -> DataValue {
        match &self.new_columns[col] {
            Some(vp) => vp.get(row),
            None => DataValue::Null,
        }
    }

    /// Read one patch row as a sparse per-schema-column overlay: `None`
    /// for columns the upsert batch does not carry, and for deleted schema
    /// columns regardless of what the batch carries.
    pub fn get_changed_patch_row(
        &self,
        rid: RecordID,
        batch: &UpsertBatch,
    ) -> Result<Vec<Option<DataValue>>> {
        let mut row = vec![None; self.schema.column_count()];
        for idx in 0..batch.column_count() {
            let col = batch.column_id(idx);
            if col >= self.schema.column_count() {
                return Err(StoreError::SchemaMismatch(format!(
                    "upsert column {} outside schema",
                    col
                )));
            }
            if self.column_deletions[col] {
                continue;
            }
            if batch.column_type(idx) != self.schema.value_type_by_column[col] {
                return Err(StoreError::SchemaMismatch(format!(
                    "upsert column {} type {:?} does not match schema {:?}",
                    col,
                    batch.column_type(idx),
                    self.schema.value_type_by_column[col]
                )));
            }
            row[col] = Some(batch.get_value(rid.index as usize, idx)?);
        }
        Ok(row)
    }

    /// Primary-key bytes of a patch row, falling back to schema defaults
    /// for missing key columns so the lookup is always well-defined.
    fn encode_patch_pk(&self, changed: &[Option<DataValue>], key: &mut Vec<u8>) -> Result<()> {
        key.clear();
        for &col in &self.schema.primary_key_columns {
            let value = match &changed[col] {
                Some(v) => v,
                None => &self.schema.default_values[col],
            };
            if value.is_null() {
                return Err(StoreError::InvalidUpsertRow(format!(
                    "null primary key column {}",
                    col
                )));
            }
            value.pack_into(self.schema.value_type_by_column[col], key);
        }
        Ok(())
    }

    /// Dense merged image of a matched base row, or `None` when the patch
    /// changes nothing (idempotent write). Unchanged cells come from the
    /// batch being assembled, so earlier in-place writes are visible.
    pub fn get_changed_base_row(
        &self,
        base_row: usize,
        changed_patch_row: &[Option<DataValue>],
    ) -> Option<Vec<Option<DataValue>>> {
        let any_change = changed_patch_row.iter().enumerate().any(|(col, cell)| {
            cell.as_ref()
                .map(|v| *v != self.new_value(base_row, col))
                .unwrap_or(false)
        });
        if !any_change {
            return None;
        }
        let mut row = vec![None; self.schema.column_count()];
        for col in 0..self.schema.column_count() {
            if self.column_deletions[col] {
                continue;
            }
            row[col] = Some(match &changed_patch_row[col] {
                Some(v) => v.clone(),
                None => self.new_value(base_row, col),
            });
        }
        Some(row)
    }

    fn any_sort_column_changed(
        &self,
        base_row: usize,
        changed_patch_row: &[Option<DataValue>],
    ) -> bool {
        self.schema.archiving_sort_columns.iter().any(|&col| {
            changed_patch_row[col]
                .as_ref()
                .map(|v| *v != self.new_value(base_row, col))
                .unwrap_or(false)
        })
    }

    /// Write the changed unsorted cells of a patch row in place at
    /// `base_row`, forking each touched column onto the new batch exactly
    /// once. A forked column becomes flat; sort compression is lost for
    /// that column only.
    pub fn write_patch_value_for_unsorted_column(
        &mut self,
        base_row: usize,
        changed_patch_row: &[Option<DataValue>],
    ) -> Result<()> {
        for (col, cell) in changed_patch_row.iter().enumerate() {
            let value = match cell {
                Some(v) => v,
                None => continue,
            };
            if self.schema.is_sort_column(col) || self.schema.is_primary_key_column(col) {
                continue;
            }
            if *value == self.new_value(base_row, col) {
                continue;
            }
            self.fork_column(col)?;
            let vp = Arc::get_mut(
                self.new_columns[col].as_mut().expect("forked column present"),
            )
            .expect("forked column is uniquely owned until publication");
            vp.set(base_row, value);
        }
        Ok(())
    }

    fn fork_column(&mut self, col: usize) -> Result<()> {
        if self.columns_forked[col] {
            return Ok(());
        }
        let flat = match &self.new_columns[col] {
            Some(vp) => vp.to_flat(),
            None => VectorParty::new_flat(self.schema.value_type_by_column[col], self.base.size),
        };
        self.tracker.charge(flat.allocated_bytes() as i64)?;
        self.new_columns[col] = Some(Arc::new(flat));
        self.columns_forked[col] = true;
        Ok(())
    }

    fn ensure_base_pk(&mut self) -> Result<()> {
        if self.base_pk.is_some() {
            return Ok(());
        }
        let mut index = AHashMap::with_capacity(self.base.size);
        let mut key = Vec::with_capacity(self.schema.primary_key_bytes);
        for row in 0..self.base.size {
            key.clear();
            for &col in &self.schema.primary_key_columns {
                self.base
                    .batch
                    .get_data_value(row, col)
                    .pack_into(self.schema.value_type_by_column[col], &mut key);
            }
            index.insert(key.clone(), row);
        }
        self.tracker.charge(
            (index.len() * (self.schema.primary_key_bytes + std::mem::size_of::<usize>())) as i64,
        )?;
        self.base_pk = Some(index);
        Ok(())
    }

    /// Fill schema defaults into the absent cells of an insert row.
    fn fill_insert_defaults(&self, mut row: Vec<Option<DataValue>>) -> Vec<Option<DataValue>> {
        for (col, cell) in row.iter_mut().enumerate() {
            if cell.is_none() && !self.column_deletions[col] {
                let default = &self.schema.default_values[col];
                if !default.is_null() {
                    *cell = Some(default.clone());
                }
            }
        }
        row
    }

    /// Run the merge: route every patch record to an in-place write, a
    /// staged re-sort, or a staged insert.
    pub fn backfill(&mut self, report: BackfillReportFn, job_key: &str) -> Result<()> {
        if self.patch.record_ids.is_empty() {
            return Ok(());
        }
        self.ensure_base_pk()?;
        let mut key = Vec::with_capacity(self.schema.primary_key_bytes);

        for (i, rid) in self.patch.record_ids.iter().enumerate() {
            let batch = self.patch.batch(*rid)?;
            let changed_patch_row = self.get_changed_patch_row(*rid, batch)?;
            self.encode_patch_pk(&changed_patch_row, &mut key)?;

            let matched = self
                .base_pk
                .as_ref()
                .and_then(|pk| pk.get(key.as_slice()).copied());
            match matched {
                None => {
                    let row = self.fill_insert_defaults(changed_patch_row);
                    self.backfill_store.merge_row(&key, &row)?;
                }
                Some(base_row) if self.base_row_deleted.contains(&base_row) => {
                    // The row already moved to staging; overlay the new
                    // cells on the staged image.
                    self.backfill_store.merge_row(&key, &changed_patch_row)?;
                }
                Some(base_row) => {
                    if let Some(changed_base_row) =
                        self.get_changed_base_row(base_row, &changed_patch_row)
                    {
                        if self.any_sort_column_changed(base_row, &changed_patch_row) {
                            self.base_row_deleted.insert(base_row);
                            self.backfill_store.merge_row(&key, &changed_base_row)?;
                        } else {
                            self.write_patch_value_for_unsorted_column(
                                base_row,
                                &changed_patch_row,
                            )?;
                        }
                    }
                }
            }

            if (i + 1) % BACKFILL_REPORT_INTERVAL_ROWS == 0 {
                let done = (i + 1) as u32;
                report(job_key, &mut |detail| {
                    detail.job.stage = "apply patch".into();
                    detail.job.num_records = done as usize;
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
