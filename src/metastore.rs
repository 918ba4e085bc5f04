//! Metastore capability consumed by the job bodies.
//!
//! `add_archive_batch_version` is the commit point of a re-archive run:
//! once it returns, the new `(batch_version, seq)` is authoritative and a
//! crashed process replays from it. `update_archiving_cutoff` must roll
//! forward on failure — the caller retries until it lands, never reverts.

use crate::Result;

pub trait MetaStore: Send + Sync {
    /// Atomically record that `day`'s archive batch now lives at
    /// `(batch_version, seq)` with `row_count` rows.
    fn add_archive_batch_version(
        &self,
        table: &str,
        shard: i32,
        day: i32,
        batch_version: u32,
        seq: u32,
        row_count: usize,
    ) -> Result<()>;

    /// Atomically publish a new archiving cutoff for the shard.
    fn update_archiving_cutoff(&self, table: &str, shard: i32, cutoff: u32) -> Result<()>;

    /// Append `values` to the enum dictionary of `column`, returning the
    /// assigned ids (existing values return their existing ids).
    fn extend_enum_dict(
        &self,
        table: &str,
        column: usize,
        values: &[String],
    ) -> Result<Vec<u32>>;
}
