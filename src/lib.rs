//! stratabase — backfill engine for a columnar, time-partitioned store
//!
//! Fact tables are archived into per-day, sort-compressed columnar batches.
//! Updates that arrive after a day has been archived ("backfill") are merged
//! back into the affected batches without blocking readers: columns touched
//! in place are forked copy-on-write onto a new batch, rows whose sort keys
//! move are staged in a live store and re-sorted during re-archive, and the
//! result is published as a new archive store version behind an atomic
//! pointer swap.
//!
//! The disk codec, metastore, redo-log ingestion and query engine are
//! external collaborators reached through the capability traits in
//! [`diskstore`] and [`metastore`].

pub mod data;
pub mod diskstore;
pub mod memstore;
pub mod metastore;
pub mod scheduler;
pub mod schema;
pub mod utils;

pub use data::{DataType, DataValue, RecordID};
pub use memstore::{HostMemoryManager, MemStore, TableShard};
pub use schema::{TableConfig, TableSchema};

/// Storage engine error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid upsert row: {0}")]
    InvalidUpsertRow(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("out of host memory: requested {requested} bytes, {available} available")]
    OutOfHostMemory { requested: i64, available: i64 },

    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("metastore error: {0}")]
    MetaStore(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("shard {1} not found for table {0}")]
    ShardNotFound(String, i32),

    #[error("job cancelled")]
    Cancelled,

    #[error("job deadline exceeded")]
    DeadlineExceeded,
}

impl StoreError {
    /// Whether retrying the enclosing job on a later tick may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::OutOfHostMemory { .. }
                | StoreError::DiskIo(_)
                | StoreError::MetaStore(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
