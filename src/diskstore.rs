//! Disk-store capability consumed by archiving, backfill and purge.
//!
//! The on-disk vector-party codec lives behind this trait; the engine only
//! streams bytes. All operations are idempotent on `(batch_version, seq)`:
//! a retried write to the same coordinates replaces the same file.

use std::io::Write;

use crate::Result;

/// Sink for one vector party's bytes. `sync` makes the bytes durable;
/// `close` finishes the file. Dropping without `close` abandons the write.
pub trait VectorPartyWriter: Write + Send {
    fn sync(&mut self) -> Result<()>;
    fn close(self: Box<Self>) -> Result<()>;
}

/// Capability interface to the disk store, injected into the memstore.
pub trait DiskStore: Send + Sync {
    /// Open the file for one column of one day's archive batch at the
    /// given `(batch_version, seq)` coordinates.
    fn open_vector_party_file_for_write(
        &self,
        table: &str,
        shard: i32,
        day: i32,
        column: usize,
        batch_version: u32,
        seq: u32,
    ) -> Result<Box<dyn VectorPartyWriter>>;

    /// Drop every persisted file of `day` at or below `(batch_version, seq)`.
    fn delete_batch_versions(
        &self,
        table: &str,
        shard: i32,
        day: i32,
        batch_version: u32,
        seq: u32,
    ) -> Result<()>;
}
