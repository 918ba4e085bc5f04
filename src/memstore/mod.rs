//! In-memory store: live and archive storage for every table shard, plus
//! the backfill machinery that moves rows between them.

pub mod archive_store;
pub mod archiving;
pub mod backfill;
pub mod batch;
pub mod host_memory;
pub mod live_store;
pub mod primary_key;
#[cfg(test)]
pub(crate) mod test_factory;
pub mod upsert_batch;
pub mod vector_party;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::diskstore::DiskStore;
use crate::metastore::MetaStore;
use crate::schema::TableSchema;
use crate::{Result, StoreError};

pub use archive_store::{ArchiveBatch, ArchiveStore, ArchiveStoreVersion};
pub use backfill::{create_backfill_patches, BackfillContext, BackfillPatch};
pub use host_memory::{HostMemoryManager, MemoryTracker};
pub use live_store::{new_backfill_store, LiveStore};
pub use upsert_batch::{UpsertBatch, UpsertBatchBuilder};
pub use vector_party::VectorParty;

/// Default rows per staging-store batch.
pub const DEFAULT_BACKFILL_STORE_BATCH_SIZE: u32 = 20_000;

/// Rows between progress reports while applying a patch.
pub const BACKFILL_REPORT_INTERVAL_ROWS: usize = 10_000;

/// One shard of one table: a live store for recent rows and an archive
/// store for the sort-compressed day partitions.
pub struct TableShard {
    pub schema: Arc<TableSchema>,
    pub shard_id: i32,
    pub live_store: RwLock<LiveStore>,
    pub archive_store: ArchiveStore,
    pub host_memory: Arc<HostMemoryManager>,
    pub(crate) meta_store: Arc<dyn MetaStore>,
    pub(crate) disk_store: Arc<dyn DiskStore>,
    /// Exclusive among archiving/backfill/purge jobs on this shard;
    /// readers never take it.
    pub(crate) archive_write_lock: Mutex<()>,
}

impl TableShard {
    pub fn new(
        schema: Arc<TableSchema>,
        meta_store: Arc<dyn MetaStore>,
        disk_store: Arc<dyn DiskStore>,
        host_memory: Arc<HostMemoryManager>,
        shard_id: i32,
    ) -> Self {
        let live_store = LiveStore::new(
            schema.config.backfill_store_batch_size,
            0,
            schema.value_type_by_column.clone(),
            schema.primary_key_bytes,
            host_memory.clone(),
        );
        Self {
            schema,
            shard_id,
            live_store: RwLock::new(live_store),
            archive_store: ArchiveStore::new(0),
            host_memory,
            meta_store,
            disk_store,
            archive_write_lock: Mutex::new(()),
        }
    }
}

/// Top-level registry of table shards plus the injected collaborators.
pub struct MemStore {
    table_shards: RwLock<AHashMap<String, AHashMap<i32, Arc<TableShard>>>>,
    pub disk_store: Arc<dyn DiskStore>,
    pub meta_store: Arc<dyn MetaStore>,
    pub host_memory: Arc<HostMemoryManager>,
}

impl MemStore {
    pub fn new(
        disk_store: Arc<dyn DiskStore>,
        meta_store: Arc<dyn MetaStore>,
        host_memory_limit: i64,
    ) -> Self {
        Self {
            table_shards: RwLock::new(AHashMap::new()),
            disk_store,
            meta_store,
            host_memory: Arc::new(HostMemoryManager::new(host_memory_limit)),
        }
    }

    pub fn add_table_shard(&self, shard: Arc<TableShard>) {
        self.table_shards
            .write()
            .entry(shard.schema.name.clone())
            .or_default()
            .insert(shard.shard_id, shard.clone());
    }

    pub fn get_table_shard(&self, table: &str, shard_id: i32) -> Result<Arc<TableShard>> {
        let shards = self.table_shards.read();
        let table_map = shards
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        table_map
            .get(&shard_id)
            .cloned()
            .ok_or_else(|| StoreError::ShardNotFound(table.to_string(), shard_id))
    }

    pub fn remove_table(&self, table: &str) {
        self.table_shards.write().remove(table);
    }

    /// Every shard of every table, for the job managers' eligibility scan.
    pub fn all_shards(&self) -> Vec<Arc<TableShard>> {
        let mut out: Vec<Arc<TableShard>> = self
            .table_shards
            .read()
            .values()
            .flat_map(|m| m.values().cloned())
            .collect();
        out.sort_by(|a, b| (&a.schema.name, a.shard_id).cmp(&(&b.schema.name, b.shard_id)));
        out
    }
}
