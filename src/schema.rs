//! Table schema and per-table configuration.
//!
//! A fact table is time-partitioned on its first column (Unix seconds) and
//! archived by day; a dimension table is unpartitioned and periodically
//! snapshotted. Sort columns drive the run-length compression of archive
//! batches; primary-key columns concatenate into a fixed-width key.

use serde::{Deserialize, Serialize};

use crate::data::{DataType, DataValue};

/// Per-table tuning knobs, all optional with serde defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Minutes the archiving cutoff trails behind now.
    #[serde(default)]
    pub archiving_delay_minutes: u32,
    /// Minutes between archiving runs on one shard.
    #[serde(default)]
    pub archiving_interval_minutes: u32,
    /// Minutes between backfill runs when the buffer threshold is not hit.
    #[serde(default)]
    pub backfill_interval_minutes: u32,
    /// Backfill buffer size that makes a backfill run due immediately.
    #[serde(default)]
    pub backfill_threshold_in_bytes: i64,
    /// Rows per staging-store batch during backfill.
    #[serde(default = "default_backfill_store_batch_size")]
    pub backfill_store_batch_size: u32,
    /// Mutation count that makes a snapshot due immediately.
    #[serde(default)]
    pub snapshot_threshold: i64,
    /// Minutes between snapshots when the mutation threshold is not hit.
    #[serde(default)]
    pub snapshot_interval_minutes: u32,
    /// Days of archived data to retain; zero disables purging.
    #[serde(default)]
    pub record_retention_in_days: i32,
}

fn default_backfill_store_batch_size() -> u32 {
    crate::memstore::DEFAULT_BACKFILL_STORE_BATCH_SIZE
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            archiving_delay_minutes: 0,
            archiving_interval_minutes: 0,
            backfill_interval_minutes: 0,
            backfill_threshold_in_bytes: 0,
            backfill_store_batch_size: default_backfill_store_batch_size(),
            snapshot_threshold: 0,
            snapshot_interval_minutes: 0,
            record_retention_in_days: 0,
        }
    }
}

/// Schema column metadata. Column order is the storage order; a deleted
/// column keeps its ordinal so record ids stay stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
}

/// Full table schema as the backfill engine sees it.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub config: TableConfig,
    pub is_fact_table: bool,
    pub columns: Vec<Column>,
    /// Column types, parallel to `columns`.
    pub value_type_by_column: Vec<DataType>,
    /// Ordinals of the archive sort columns, highest priority first.
    pub archiving_sort_columns: Vec<usize>,
    /// Ordinals of the primary-key columns.
    pub primary_key_columns: Vec<usize>,
    /// Total packed width of one primary key in bytes.
    pub primary_key_bytes: usize,
    /// Per-column default used when an upsert omits a column.
    pub default_values: Vec<DataValue>,
}

impl TableSchema {
    /// Per-column deletion flags, parallel to `columns`.
    pub fn column_deletions(&self) -> Vec<bool> {
        self.columns.iter().map(|c| c.deleted).collect()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Whether `col` participates in the archiving sort order.
    pub fn is_sort_column(&self, col: usize) -> bool {
        self.archiving_sort_columns.contains(&col)
    }

    /// Whether `col` is part of the primary key.
    pub fn is_primary_key_column(&self, col: usize) -> bool {
        self.primary_key_columns.contains(&col)
    }

    /// Packs the primary-key columns of `row` into `key`, which must be
    /// `primary_key_bytes` long. Returns false if any key cell is missing
    /// or null; primary keys are always valid.
    pub fn encode_primary_key(
        &self,
        row: &[Option<DataValue>],
        key: &mut Vec<u8>,
    ) -> bool {
        key.clear();
        for &col in &self.primary_key_columns {
            match row.get(col) {
                Some(Some(value)) if !value.is_null() => {
                    value.pack_into(self.value_type_by_column[col], key)
                }
                _ => return false,
            }
        }
        debug_assert_eq!(key.len(), self.primary_key_bytes);
        true
    }
}
