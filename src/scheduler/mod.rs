//! Background job scheduler.
//!
//! One tick thread periodically asks every job manager for runnable jobs
//! and dispatches them on a rayon pool, with at most one in-flight job per
//! `{table}|{shard}|{kind}` key. A job that outlives `2 × interval` is
//! recorded as failed with `next_run = now + interval`; shutdown flips a
//! stop flag the jobs poll cooperatively.

pub mod job_detail;
pub mod job_manager;
pub mod jobs;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;

use crate::memstore::MemStore;
use crate::scheduler::job_manager::{
    ArchivingJobManager, BackfillJobManager, JobManager, PurgeJobManager, SnapshotJobManager,
};
use crate::utils;
use crate::StoreError;

pub use jobs::{ArchivingJob, BackfillJob, Job, PurgeJob, SnapshotJob};

/// Seconds between scheduler ticks.
const SCHEDULER_TICK_SECONDS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    Archiving,
    Backfill,
    Snapshot,
    Purge,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Archiving => "archiving",
            JobType::Backfill => "backfill",
            JobType::Snapshot => "snapshot",
            JobType::Purge => "purge",
        }
    }
}

/// The `"{table}|{shard}|{kind}"` job key.
pub fn job_identifier(table: &str, shard_id: i32, kind: JobType) -> String {
    format!("{}|{}|{}", table, shard_id, kind.as_str())
}

pub struct Scheduler {
    mem_store: Arc<MemStore>,
    pub archiving_manager: Arc<ArchivingJobManager>,
    pub backfill_manager: Arc<BackfillJobManager>,
    pub snapshot_manager: Arc<SnapshotJobManager>,
    pub purge_manager: Arc<PurgeJobManager>,
    /// Keys of in-flight jobs; at most one run per key.
    running: Arc<Mutex<HashSet<String>>>,
    stop: Arc<AtomicBool>,
    pool: rayon::ThreadPool,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(mem_store: Arc<MemStore>) -> Arc<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(4)
            .thread_name(|i| format!("job-worker-{}", i))
            .build()
            .expect("job pool construction cannot fail with static config");
        Arc::new(Self {
            archiving_manager: Arc::new(ArchivingJobManager::new(mem_store.clone())),
            backfill_manager: Arc::new(BackfillJobManager::new(mem_store.clone())),
            snapshot_manager: Arc::new(SnapshotJobManager::new(mem_store.clone())),
            purge_manager: Arc::new(PurgeJobManager::new(mem_store.clone())),
            mem_store,
            running: Arc::new(Mutex::new(HashSet::new())),
            stop: Arc::new(AtomicBool::new(false)),
            pool,
            tick_handle: Mutex::new(None),
        })
    }

    pub fn mem_store(&self) -> &Arc<MemStore> {
        &self.mem_store
    }

    fn managers(&self) -> [Arc<dyn JobManager>; 4] {
        [
            self.archiving_manager.clone(),
            self.backfill_manager.clone(),
            self.snapshot_manager.clone(),
            self.purge_manager.clone(),
        ]
    }

    pub fn job_manager(&self, kind: JobType) -> Arc<dyn JobManager> {
        match kind {
            JobType::Archiving => self.archiving_manager.clone(),
            JobType::Backfill => self.backfill_manager.clone(),
            JobType::Snapshot => self.snapshot_manager.clone(),
            JobType::Purge => self.purge_manager.clone(),
        }
    }

    /// Job-detail JSON of one kind, keyed by job key.
    pub fn get_job_details(&self, kind: JobType) -> serde_json::Value {
        self.job_manager(kind).job_details_json()
    }

    /// Start the tick thread. Idempotent while running.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.tick_handle.lock();
        if handle.is_some() {
            return;
        }
        self.stop.store(false, Ordering::Release);
        let scheduler = self.clone();
        *handle = Some(std::thread::spawn(move || {
            log::info!("scheduler tick loop started");
            while !scheduler.stop.load(Ordering::Acquire) {
                scheduler.run_one_cycle();
                // sleep in short slices so shutdown is prompt
                for _ in 0..SCHEDULER_TICK_SECONDS {
                    if scheduler.stop.load(Ordering::Acquire) {
                        break;
                    }
                    std::thread::sleep(StdDuration::from_secs(1));
                }
            }
            log::info!("scheduler tick loop stopped");
        }));
    }

    /// Signal shutdown and join the tick thread. Running jobs observe the
    /// stop flag and unwind as cancelled.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.tick_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// One eligibility scan plus dispatch across all four managers.
    pub fn run_one_cycle(&self) {
        for manager in self.managers() {
            for job in manager.generate_jobs() {
                self.dispatch(manager.clone(), job);
            }
        }
    }

    fn dispatch(&self, manager: Arc<dyn JobManager>, job: Box<dyn Job>) {
        let key = job.identifier();
        if !self.running.lock().insert(key.clone()) {
            return;
        }
        manager.mark_job_started(&key);
        let running = self.running.clone();
        let stop = self.stop.clone();
        log::info!("dispatching {}", job);
        self.pool.spawn(move || {
            let started = utils::now();
            let deadline = job.interval() * 2;
            let mut result = job.run(&stop);
            let elapsed = utils::now() - started;
            if result.is_ok() && elapsed > deadline {
                result = Err(StoreError::DeadlineExceeded);
            }
            match &result {
                Ok(()) => log::info!("{} succeeded in {}ms", job, elapsed.num_milliseconds()),
                Err(e) => log::error!("{} failed: {}", job, e),
            }
            let next_run = utils::now() + job.interval();
            manager.mark_job_finished(&key, result.as_ref().err(), started, Some(next_run));
            running.lock().remove(&key);
        });
    }

    /// Drop every job detail of `table`: archiving, backfill and purge for
    /// fact tables, snapshot always. Unknown tables are a no-op.
    pub fn delete_table(&self, table: &str, is_fact_table: bool) {
        if is_fact_table {
            self.archiving_manager.delete_table(table);
            self.backfill_manager.delete_table(table);
            self.purge_manager.delete_table(table);
        }
        self.snapshot_manager.delete_table(table);
    }

    // Job constructors, exposed for operational tooling and tests.

    pub fn new_archiving_job(&self, table: &str, shard_id: i32, cutoff: u32) -> Box<dyn Job> {
        let interval = self.table_interval(table, shard_id, JobType::Archiving);
        Box::new(ArchivingJob::new(
            table.to_string(),
            shard_id,
            cutoff,
            interval,
            self.mem_store.clone(),
            self.archiving_manager.details.clone(),
        ))
    }

    pub fn new_backfill_job(&self, table: &str, shard_id: i32) -> Box<dyn Job> {
        let interval = self.table_interval(table, shard_id, JobType::Backfill);
        Box::new(BackfillJob::new(
            table.to_string(),
            shard_id,
            interval,
            self.mem_store.clone(),
            self.backfill_manager.details.clone(),
        ))
    }

    pub fn new_snapshot_job(&self, table: &str, shard_id: i32) -> Box<dyn Job> {
        let interval = self.table_interval(table, shard_id, JobType::Snapshot);
        Box::new(SnapshotJob::new(
            table.to_string(),
            shard_id,
            interval,
            self.mem_store.clone(),
            self.snapshot_manager.details.clone(),
        ))
    }

    pub fn new_purge_job(
        &self,
        table: &str,
        shard_id: i32,
        batch_id_start: i32,
        batch_id_end: i32,
    ) -> Box<dyn Job> {
        Box::new(PurgeJob::new(
            table.to_string(),
            shard_id,
            batch_id_start,
            batch_id_end,
            self.mem_store.clone(),
            self.purge_manager.details.clone(),
        ))
    }

    fn table_interval(&self, table: &str, shard_id: i32, kind: JobType) -> chrono::Duration {
        let minutes = self
            .mem_store
            .get_table_shard(table, shard_id)
            .map(|shard| match kind {
                JobType::Archiving => shard.schema.config.archiving_interval_minutes,
                JobType::Backfill => shard.schema.config.backfill_interval_minutes,
                JobType::Snapshot => shard.schema.config.snapshot_interval_minutes,
                JobType::Purge => 24 * 60,
            })
            .unwrap_or(0);
        chrono::Duration::minutes(minutes as i64)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.tick_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
