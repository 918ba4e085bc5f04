//! The four background job kinds behind one [`Job`] contract.
//!
//! Jobs are plain data plus a `run` body; all scheduling state lives in
//! the managers' detail maps, which the jobs report into while running.
//! Cancellation is cooperative: `run` polls the stop flag between stages
//! and returns `Cancelled`, leaving the previous archive version
//! installed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration;

use crate::memstore::backfill::create_backfill_patches;
use crate::memstore::MemStore;
use crate::scheduler::job_detail::{BackfillJobDetail, PurgeJobDetail, SnapshotJobDetail};
use crate::scheduler::job_detail::ArchivingJobDetail;
use crate::scheduler::job_manager::DetailMap;
use crate::scheduler::{job_identifier, JobType};
use crate::{Result, StoreError};

/// Common contract of every job kind.
pub trait Job: Send + Sync + fmt::Display {
    /// The `"{table}|{shard}|{kind}"` key.
    fn identifier(&self) -> String;
    /// Execute; polls `stop` between stages.
    fn run(&self, stop: &AtomicBool) -> Result<()>;
    /// The kind's configured interval, used for deadlines and `next_run`.
    fn interval(&self) -> Duration;
}

fn check_stop(stop: &AtomicBool) -> Result<()> {
    if stop.load(Ordering::Acquire) {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

// ============================================================================
// Archiving
// ============================================================================

pub struct ArchivingJob {
    pub table_name: String,
    pub shard_id: i32,
    pub cutoff: u32,
    interval: Duration,
    mem_store: Arc<MemStore>,
    details: DetailMap<ArchivingJobDetail>,
}

impl ArchivingJob {
    pub fn new(
        table_name: String,
        shard_id: i32,
        cutoff: u32,
        interval: Duration,
        mem_store: Arc<MemStore>,
        details: DetailMap<ArchivingJobDetail>,
    ) -> Self {
        Self { table_name, shard_id, cutoff, interval, mem_store, details }
    }
}

impl fmt::Display for ArchivingJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ArchivingJob<Table: {}, ShardID: {}, Cutoff: {}>",
            self.table_name, self.shard_id, self.cutoff
        )
    }
}

impl Job for ArchivingJob {
    fn identifier(&self) -> String {
        job_identifier(&self.table_name, self.shard_id, JobType::Archiving)
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run(&self, stop: &AtomicBool) -> Result<()> {
        check_stop(stop)?;
        let key = self.identifier();
        let cutoff = self.cutoff;
        self.details.report(&key, |d| {
            d.running_cutoff = cutoff;
            d.job.stage = "archiving".into();
        });
        let shard = self.mem_store.get_table_shard(&self.table_name, self.shard_id)?;
        let result = shard.advance_archiving_cutoff(cutoff);
        self.details.report(&key, |d| {
            d.running_cutoff = 0;
            if result.is_ok() {
                d.last_cutoff = cutoff;
                d.current_cutoff = cutoff;
            }
        });
        result
    }
}

// ============================================================================
// Backfill
// ============================================================================

pub struct BackfillJob {
    pub table_name: String,
    pub shard_id: i32,
    interval: Duration,
    mem_store: Arc<MemStore>,
    details: DetailMap<BackfillJobDetail>,
}

impl BackfillJob {
    pub fn new(
        table_name: String,
        shard_id: i32,
        interval: Duration,
        mem_store: Arc<MemStore>,
        details: DetailMap<BackfillJobDetail>,
    ) -> Self {
        Self { table_name, shard_id, interval, mem_store, details }
    }
}

impl fmt::Display for BackfillJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackfillJob<Table: {}, ShardID: {}>", self.table_name, self.shard_id)
    }
}

impl Job for BackfillJob {
    fn identifier(&self) -> String {
        job_identifier(&self.table_name, self.shard_id, JobType::Backfill)
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run(&self, stop: &AtomicBool) -> Result<()> {
        check_stop(stop)?;
        let shard = self.mem_store.get_table_shard(&self.table_name, self.shard_id)?;
        let (batches, buffered_bytes, redolog_file, batch_offset) = {
            let live = shard.live_store.read();
            let (batches, bytes) = live.backfill_manager.drain();
            (
                batches,
                bytes,
                live.backfill_manager.current_redolog_file.load(Ordering::Acquire),
                live.backfill_manager.current_batch_offset.load(Ordering::Acquire),
            )
        };
        if batches.is_empty() {
            return Ok(());
        }
        log::info!("{} draining {} upsert batches", self, batches.len());

        let key = self.identifier();
        let details = self.details.clone();
        let report = move |key: &str, mutate: &mut dyn FnMut(&mut BackfillJobDetail)| {
            details.report(key, |d| mutate(d));
        };
        let patches = create_backfill_patches(batches, &report, &key)?;
        check_stop(stop)?;
        shard.create_new_archive_store_version_for_backfill(&patches, &report, &key)?;

        shard
            .live_store
            .read()
            .backfill_manager
            .release_buffered_bytes(buffered_bytes);
        self.details.report(&key, |d| {
            d.redolog_file = redolog_file;
            d.batch_offset = batch_offset;
        });
        Ok(())
    }
}

// ============================================================================
// Snapshot
// ============================================================================

pub struct SnapshotJob {
    pub table_name: String,
    pub shard_id: i32,
    interval: Duration,
    mem_store: Arc<MemStore>,
    details: DetailMap<SnapshotJobDetail>,
}

impl SnapshotJob {
    pub fn new(
        table_name: String,
        shard_id: i32,
        interval: Duration,
        mem_store: Arc<MemStore>,
        details: DetailMap<SnapshotJobDetail>,
    ) -> Self {
        Self { table_name, shard_id, interval, mem_store, details }
    }
}

impl fmt::Display for SnapshotJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotJob<Table: {}, ShardID: {}>", self.table_name, self.shard_id)
    }
}

impl Job for SnapshotJob {
    fn identifier(&self) -> String {
        job_identifier(&self.table_name, self.shard_id, JobType::Snapshot)
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run(&self, stop: &AtomicBool) -> Result<()> {
        check_stop(stop)?;
        let shard = self.mem_store.get_table_shard(&self.table_name, self.shard_id)?;
        let key = self.identifier();
        let (mutations, redolog_file, batch_offset, num_batches) = {
            let live = shard.live_store.read();
            (
                live.snapshot_manager.num_mutations.swap(0, Ordering::AcqRel),
                live.snapshot_manager.current_redolog_file.load(Ordering::Acquire),
                live.snapshot_manager.current_batch_offset.load(Ordering::Acquire),
                live.batches.len() as u32,
            )
        };
        self.details.report(&key, |d| {
            d.num_mutations = mutations;
            d.num_batches = num_batches;
            d.redolog_file = redolog_file;
            d.batch_offset = batch_offset;
            d.job.stage = "snapshot".into();
        });
        log::debug!("{} checkpointed {} mutations", self, mutations);
        Ok(())
    }
}

// ============================================================================
// Purge
// ============================================================================

pub struct PurgeJob {
    pub table_name: String,
    pub shard_id: i32,
    pub batch_id_start: i32,
    pub batch_id_end: i32,
    mem_store: Arc<MemStore>,
    details: DetailMap<PurgeJobDetail>,
}

impl PurgeJob {
    pub fn new(
        table_name: String,
        shard_id: i32,
        batch_id_start: i32,
        batch_id_end: i32,
        mem_store: Arc<MemStore>,
        details: DetailMap<PurgeJobDetail>,
    ) -> Self {
        Self { table_name, shard_id, batch_id_start, batch_id_end, mem_store, details }
    }
}

impl fmt::Display for PurgeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PurgeJob<Table: {}, ShardID: {}>", self.table_name, self.shard_id)
    }
}

impl Job for PurgeJob {
    fn identifier(&self) -> String {
        job_identifier(&self.table_name, self.shard_id, JobType::Purge)
    }

    fn interval(&self) -> Duration {
        // purges re-evaluate daily: day granularity is the partition unit
        Duration::days(1)
    }

    fn run(&self, stop: &AtomicBool) -> Result<()> {
        check_stop(stop)?;
        let shard = self.mem_store.get_table_shard(&self.table_name, self.shard_id)?;
        let key = self.identifier();
        let details = self.details.clone();
        let report = move |key: &str, mutate: &mut dyn FnMut(&mut PurgeJobDetail)| {
            details.report(key, |d| mutate(d));
        };
        shard.purge_archive_batches(self.batch_id_start, self.batch_id_end, &report, &key)?;
        Ok(())
    }
}
