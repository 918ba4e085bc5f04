//! Append-only live store with a primary-key index.
//!
//! Used in two roles: the per-shard live store fed by ingestion, and the
//! backfill staging store owned by one backfill context. Rows are
//! allocated sequentially through `next_write_record`; batches are
//! preallocated to `batch_size` rows and a full batch rolls over to
//! `batch_id + 1`. Readers see rows up to `last_read_record` only, so a
//! snapshot taken after `advance_last_read_record` is consistent without
//! locking out the writer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU32};
use std::sync::Arc;

use crate::data::{DataType, DataValue, RecordID, BASE_BATCH_ID};
use crate::memstore::batch::LiveBatch;
use crate::memstore::host_memory::{HostMemoryManager, MemoryTracker};
use crate::memstore::primary_key::{FindOrInsert, PrimaryKey};
use crate::schema::TableSchema;
use crate::Result;

/// Backfill buffer: upsert batches whose rows fall below the archiving
/// cutoff, parked here by the ingestion path until the backfill job
/// drains them. Atomics so the scheduler reads the buffer size without
/// the store lock. On a crash the buffer is rebuilt by redo-log replay
/// from the recorded checkpoint.
#[derive(Debug, Default)]
pub struct BackfillManager {
    pub current_buffer_size: AtomicI64,
    pub current_redolog_file: AtomicI64,
    pub current_batch_offset: AtomicU32,
    queue: parking_lot::Mutex<Vec<crate::memstore::upsert_batch::UpsertBatch>>,
}

impl BackfillManager {
    /// Park one upsert batch and move the redo-log checkpoint.
    pub fn append_upsert_batch(
        &self,
        batch: crate::memstore::upsert_batch::UpsertBatch,
        redolog_file: i64,
        batch_offset: u32,
    ) {
        use std::sync::atomic::Ordering;
        self.current_buffer_size
            .fetch_add(batch.allocated_bytes() as i64, Ordering::AcqRel);
        self.current_redolog_file.store(redolog_file, Ordering::Release);
        self.current_batch_offset.store(batch_offset, Ordering::Release);
        self.queue.lock().push(batch);
    }

    /// Take everything parked so far, returning the batches and the bytes
    /// they accounted for. The caller subtracts the bytes after the
    /// backfill commits.
    pub fn drain(&self) -> (Vec<crate::memstore::upsert_batch::UpsertBatch>, i64) {
        let batches = std::mem::take(&mut *self.queue.lock());
        let bytes = batches.iter().map(|b| b.allocated_bytes() as i64).sum();
        (batches, bytes)
    }

    pub fn release_buffered_bytes(&self, bytes: i64) {
        use std::sync::atomic::Ordering;
        self.current_buffer_size.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Dimension-table mutation bookkeeping consumed by the snapshot job.
#[derive(Debug, Default)]
pub struct SnapshotManager {
    pub num_mutations: AtomicI64,
    pub current_redolog_file: AtomicI64,
    pub current_batch_offset: AtomicU32,
}

pub struct LiveStore {
    /// Rows per batch; 1 is a legal (stress) configuration.
    pub batch_size: u32,
    pub batches: BTreeMap<i32, LiveBatch>,
    /// Next row to allocate.
    pub next_write_record: RecordID,
    /// First unreadable row; readers stop here.
    pub last_read_record: RecordID,
    pub primary_key: PrimaryKey,
    pub backfill_manager: BackfillManager,
    pub snapshot_manager: SnapshotManager,
    column_types: Vec<DataType>,
    tracker: MemoryTracker,
}

impl LiveStore {
    pub fn new(
        batch_size: u32,
        start_batch_id: i32,
        column_types: Vec<DataType>,
        primary_key_bytes: usize,
        memory: Arc<HostMemoryManager>,
    ) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batches: BTreeMap::new(),
            next_write_record: RecordID::new(start_batch_id, 0),
            last_read_record: RecordID::new(start_batch_id, 0),
            primary_key: PrimaryKey::new(primary_key_bytes),
            backfill_manager: BackfillManager::default(),
            snapshot_manager: SnapshotManager::default(),
            column_types,
            tracker: MemoryTracker::new(memory),
        }
    }

    pub fn column_types(&self) -> &[DataType] {
        &self.column_types
    }

    /// Estimated bytes of one fully materialized batch, charged on batch
    /// creation.
    fn batch_charge(&self) -> i64 {
        let row_width: usize = self
            .column_types
            .iter()
            .map(|t| if t.is_array() { 8 } else { t.value_width() })
            .sum();
        self.batch_size as i64 * row_width as i64
    }

    /// Allocate the next sequential row, rolling over full batches.
    pub fn allocate_row(&mut self) -> Result<RecordID> {
        let rid = self.next_write_record;
        if !self.batches.contains_key(&rid.batch_id) {
            self.tracker.charge(self.batch_charge())?;
            self.batches.insert(
                rid.batch_id,
                LiveBatch::new(self.batch_size as usize, self.column_types.len()),
            );
        }
        self.next_write_record = if rid.index + 1 == self.batch_size {
            RecordID::new(rid.batch_id + 1, 0)
        } else {
            RecordID::new(rid.batch_id, rid.index + 1)
        };
        Ok(rid)
    }

    /// Write the present cells of `row` at `rid`. Absent cells are left
    /// untouched, so a later write for the same key overlays the earlier.
    pub fn write_row(&mut self, rid: RecordID, row: &[Option<DataValue>]) {
        let batch = self
            .batches
            .get_mut(&rid.batch_id)
            .expect("write to an unallocated batch");
        for (col, cell) in row.iter().enumerate() {
            if let Some(value) = cell {
                batch.set_value(rid.index as usize, col, self.column_types[col], value);
            }
        }
    }

    /// Upsert a row by primary key: an existing key overwrites in place
    /// (last write wins), a new key allocates the next sequential row.
    pub fn merge_row(&mut self, key: &[u8], row: &[Option<DataValue>]) -> Result<RecordID> {
        let rid = match self.primary_key.find(key) {
            Some(rid) => rid,
            None => {
                let rid = self.allocate_row()?;
                let inserted = self.primary_key.find_or_insert(key, rid);
                debug_assert_eq!(inserted, FindOrInsert::Inserted);
                rid
            }
        };
        self.write_row(rid, row);
        Ok(rid)
    }

    pub fn get_data_value(&self, rid: RecordID, col: usize) -> DataValue {
        match self.batches.get(&rid.batch_id) {
            Some(batch) => batch.get_data_value(rid.index as usize, col),
            None => DataValue::Null,
        }
    }

    /// Publish all written rows to readers.
    pub fn advance_last_read_record(&mut self) {
        self.last_read_record = self.next_write_record;
    }

    /// Consistent read view over the published rows.
    pub fn snapshot(&self) -> LiveStoreSnapshot<'_> {
        LiveStoreSnapshot { store: self, end: self.last_read_record }
    }
}

/// Read view pinned at one `last_read_record`.
pub struct LiveStoreSnapshot<'a> {
    store: &'a LiveStore,
    end: RecordID,
}

impl<'a> LiveStoreSnapshot<'a> {
    pub fn store(&self) -> &'a LiveStore {
        self.store
    }

    /// Record ids of every readable row, in allocation order.
    pub fn record_ids(&self) -> Vec<RecordID> {
        let mut out = Vec::new();
        for (&batch_id, _) in &self.store.batches {
            if batch_id > self.end.batch_id {
                break;
            }
            let rows = if batch_id == self.end.batch_id {
                self.end.index
            } else {
                self.store.batch_size
            };
            out.extend((0..rows).map(|index| RecordID::new(batch_id, index)));
        }
        out
    }
}

/// The staging store used by one backfill context: same structure as a
/// live store, addressed from [`BASE_BATCH_ID`].
pub fn new_backfill_store(
    schema: &TableSchema,
    memory: Arc<HostMemoryManager>,
) -> LiveStore {
    LiveStore::new(
        schema.config.backfill_store_batch_size,
        BASE_BATCH_ID,
        schema.value_type_by_column.clone(),
        schema.primary_key_bytes,
        memory,
    )
}
