//! Job managers: eligibility scanning and progress bookkeeping for the
//! four background job kinds.
//!
//! Each manager owns a map of job key → detail. `generate_jobs` scans all
//! shards, upserts a detail for every candidate (waiting shards appear in
//! listings too) and returns the runnable jobs. All detail mutation goes
//! through the shared [`DetailMap`] under its lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::memstore::MemStore;
use crate::scheduler::job_detail::{
    ArchivingJobDetail, BackfillJobDetail, JobDetail, JobStatus, PurgeJobDetail,
    SnapshotJobDetail,
};
use crate::scheduler::jobs::{ArchivingJob, BackfillJob, PurgeJob, SnapshotJob};
use crate::scheduler::{job_identifier, Job, JobType};
use crate::utils;
use crate::StoreError;

/// Access to the embedded common detail, for the generic status machine.
pub trait HasJobDetail {
    fn job(&self) -> &JobDetail;
    fn job_mut(&mut self) -> &mut JobDetail;
}

macro_rules! impl_has_job_detail {
    ($($ty:ty),*) => {$(
        impl HasJobDetail for $ty {
            fn job(&self) -> &JobDetail {
                &self.job
            }
            fn job_mut(&mut self) -> &mut JobDetail {
                &mut self.job
            }
        }
    )*};
}

impl_has_job_detail!(ArchivingJobDetail, BackfillJobDetail, SnapshotJobDetail, PurgeJobDetail);

// ============================================================================
// Detail map
// ============================================================================

/// Shared job-detail map; managers and running jobs hold clones.
pub struct DetailMap<D> {
    inner: Arc<RwLock<BTreeMap<String, D>>>,
}

impl<D> Clone for DetailMap<D> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<D: Default + Clone + Serialize + HasJobDetail> DetailMap<D> {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(BTreeMap::new())) }
    }

    /// Apply a mutation to the detail at `key`, creating it if absent.
    pub fn report<F: FnOnce(&mut D)>(&self, key: &str, f: F) {
        let mut map = self.inner.write();
        f(map.entry(key.to_string()).or_default());
    }

    pub fn get(&self, key: &str) -> Option<D> {
        self.inner.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Drop every key with the `"{table}|"` prefix. Unknown tables are a
    /// no-op, never an error.
    pub fn delete_table(&self, table: &str) {
        let prefix = format!("{}|", table);
        self.inner.write().retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&*self.inner.read()).unwrap_or(serde_json::Value::Null)
    }

    fn status(&self, key: &str) -> JobStatus {
        self.inner
            .read()
            .get(key)
            .map(|d| d.job().status)
            .unwrap_or_default()
    }

    /// Whether the interval has elapsed since the key's last run. A key
    /// that has never run is primed: `last_run` is stamped to `now` and
    /// the countdown starts from this first evaluation, so a fresh shard
    /// waits one full interval instead of firing on its first scan.
    fn interval_due(&self, key: &str, now: DateTime<Utc>, interval: Duration) -> bool {
        let mut map = self.inner.write();
        let job = map.entry(key.to_string()).or_default().job_mut();
        match job.last_run {
            Some(last) => now - last >= interval,
            None => {
                job.last_run = Some(now);
                false
            }
        }
    }

    fn mark_started(&self, key: &str, now: DateTime<Utc>) {
        self.report(key, |d| {
            let job = d.job_mut();
            job.status = JobStatus::Running;
            job.last_start_time = Some(now);
        });
    }

    fn mark_finished(
        &self,
        key: &str,
        error: Option<&StoreError>,
        started: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) {
        let now = utils::now();
        self.report(key, |d| {
            let job = d.job_mut();
            job.last_run = Some(now);
            job.last_duration_ms = (now - started).num_milliseconds().max(0) as u64;
            match error {
                None => {
                    job.status = JobStatus::Succeeded;
                    job.stage.clear();
                }
                Some(_) => {
                    job.status = JobStatus::Failed;
                    job.next_run = next_run;
                }
            }
        });
    }
}

// ============================================================================
// Manager trait
// ============================================================================

/// Kind-independent manager surface consumed by the scheduler loop.
pub trait JobManager: Send + Sync {
    fn job_type(&self) -> JobType;
    /// Scan all shards, upsert details, return runnable jobs.
    fn generate_jobs(&self) -> Vec<Box<dyn Job>>;
    fn delete_table(&self, table: &str);
    fn job_details_json(&self) -> serde_json::Value;
    fn num_details(&self) -> usize;
    fn detail_keys(&self) -> Vec<String>;
    fn mark_job_started(&self, key: &str);
    fn mark_job_finished(
        &self,
        key: &str,
        error: Option<&StoreError>,
        started: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    );
}

macro_rules! impl_job_manager_common {
    ($kind:expr) => {
        fn job_type(&self) -> JobType {
            $kind
        }
        fn delete_table(&self, table: &str) {
            self.details.delete_table(table);
        }
        fn job_details_json(&self) -> serde_json::Value {
            self.details.to_json()
        }
        fn num_details(&self) -> usize {
            self.details.len()
        }
        fn detail_keys(&self) -> Vec<String> {
            self.details.keys()
        }
        fn mark_job_started(&self, key: &str) {
            self.details.mark_started(key, utils::now());
        }
        fn mark_job_finished(
            &self,
            key: &str,
            error: Option<&StoreError>,
            started: DateTime<Utc>,
            next_run: Option<DateTime<Utc>>,
        ) {
            self.details.mark_finished(key, error, started, next_run);
        }
    };
}

// ============================================================================
// Archiving
// ============================================================================

pub struct ArchivingJobManager {
    mem_store: Arc<MemStore>,
    pub(crate) details: DetailMap<ArchivingJobDetail>,
}

impl ArchivingJobManager {
    pub fn new(mem_store: Arc<MemStore>) -> Self {
        Self { mem_store, details: DetailMap::new() }
    }

    pub fn report_archiving_job_detail<F: FnOnce(&mut ArchivingJobDetail)>(
        &self,
        key: &str,
        f: F,
    ) {
        self.details.report(key, f);
    }

    pub fn get_job_detail(&self, key: &str) -> Option<ArchivingJobDetail> {
        self.details.get(key)
    }
}

impl JobManager for ArchivingJobManager {
    impl_job_manager_common!(JobType::Archiving);

    fn generate_jobs(&self) -> Vec<Box<dyn Job>> {
        let now = utils::now();
        let mut jobs: Vec<Box<dyn Job>> = Vec::new();
        for shard in self.mem_store.all_shards() {
            let schema = &shard.schema;
            if !schema.is_fact_table {
                continue;
            }
            let key = job_identifier(&schema.name, shard.shard_id, JobType::Archiving);
            let config = &schema.config;
            let interval = Duration::minutes(config.archiving_interval_minutes as i64);
            let current_cutoff = shard.archive_store.current_version().archiving_cutoff;
            let candidate = (now.timestamp() - config.archiving_delay_minutes as i64 * 60)
                .max(0) as u32;

            if self.details.status(&key) == JobStatus::Running {
                self.details.report(&key, |d| d.current_cutoff = current_cutoff);
                continue;
            }
            let eligible = candidate > current_cutoff
                && self.details.interval_due(&key, now, interval);
            if eligible {
                self.details.report(&key, |d| {
                    d.current_cutoff = current_cutoff;
                    d.job.status = JobStatus::Ready;
                    d.job.next_run = None;
                });
                jobs.push(Box::new(ArchivingJob::new(
                    schema.name.clone(),
                    shard.shard_id,
                    candidate,
                    interval,
                    self.mem_store.clone(),
                    self.details.clone(),
                )));
            } else {
                self.details.report(&key, |d| {
                    d.current_cutoff = current_cutoff;
                    d.job.status = JobStatus::Waiting;
                    d.job.next_run = Some(now + interval);
                });
            }
        }
        jobs
    }
}

// ============================================================================
// Backfill
// ============================================================================

pub struct BackfillJobManager {
    mem_store: Arc<MemStore>,
    pub(crate) details: DetailMap<BackfillJobDetail>,
}

impl BackfillJobManager {
    pub fn new(mem_store: Arc<MemStore>) -> Self {
        Self { mem_store, details: DetailMap::new() }
    }

    pub fn report_backfill_job_detail<F: FnOnce(&mut BackfillJobDetail)>(&self, key: &str, f: F) {
        self.details.report(key, f);
    }

    pub fn get_job_detail(&self, key: &str) -> Option<BackfillJobDetail> {
        self.details.get(key)
    }
}

impl JobManager for BackfillJobManager {
    impl_job_manager_common!(JobType::Backfill);

    fn generate_jobs(&self) -> Vec<Box<dyn Job>> {
        use std::sync::atomic::Ordering;
        let now = utils::now();
        let mut jobs: Vec<Box<dyn Job>> = Vec::new();
        for shard in self.mem_store.all_shards() {
            let schema = &shard.schema;
            if !schema.is_fact_table {
                continue;
            }
            let key = job_identifier(&schema.name, shard.shard_id, JobType::Backfill);
            let config = &schema.config;
            let interval = Duration::minutes(config.backfill_interval_minutes as i64);
            if self.details.status(&key) == JobStatus::Running {
                continue;
            }
            let buffer_size = shard
                .live_store
                .read()
                .backfill_manager
                .current_buffer_size
                .load(Ordering::Acquire);
            let buffer_due =
                config.backfill_threshold_in_bytes > 0 && buffer_size >= config.backfill_threshold_in_bytes;
            let eligible = buffer_due || self.details.interval_due(&key, now, interval);
            if eligible {
                self.details.report(&key, |d| {
                    d.job.status = JobStatus::Ready;
                    d.job.next_run = None;
                });
                jobs.push(Box::new(BackfillJob::new(
                    schema.name.clone(),
                    shard.shard_id,
                    interval,
                    self.mem_store.clone(),
                    self.details.clone(),
                )));
            } else {
                self.details.report(&key, |d| {
                    d.job.status = JobStatus::Waiting;
                });
            }
        }
        jobs
    }
}

// ============================================================================
// Snapshot
// ============================================================================

pub struct SnapshotJobManager {
    mem_store: Arc<MemStore>,
    pub(crate) details: DetailMap<SnapshotJobDetail>,
}

impl SnapshotJobManager {
    pub fn new(mem_store: Arc<MemStore>) -> Self {
        Self { mem_store, details: DetailMap::new() }
    }

    pub fn report_snapshot_job_detail<F: FnOnce(&mut SnapshotJobDetail)>(&self, key: &str, f: F) {
        self.details.report(key, f);
    }

    pub fn get_job_detail(&self, key: &str) -> Option<SnapshotJobDetail> {
        self.details.get(key)
    }
}

impl JobManager for SnapshotJobManager {
    impl_job_manager_common!(JobType::Snapshot);

    fn generate_jobs(&self) -> Vec<Box<dyn Job>> {
        use std::sync::atomic::Ordering;
        let now = utils::now();
        let mut jobs: Vec<Box<dyn Job>> = Vec::new();
        for shard in self.mem_store.all_shards() {
            let schema = &shard.schema;
            if schema.is_fact_table {
                continue;
            }
            let key = job_identifier(&schema.name, shard.shard_id, JobType::Snapshot);
            let config = &schema.config;
            let interval = Duration::minutes(config.snapshot_interval_minutes as i64);
            if self.details.status(&key) == JobStatus::Running {
                continue;
            }
            let mutations = shard
                .live_store
                .read()
                .snapshot_manager
                .num_mutations
                .load(Ordering::Acquire);
            let mutations_due = config.snapshot_threshold > 0 && mutations >= config.snapshot_threshold;
            let eligible = mutations_due || self.details.interval_due(&key, now, interval);
            if eligible {
                self.details.report(&key, |d| {
                    d.job.status = JobStatus::Ready;
                    d.job.next_run = None;
                });
                jobs.push(Box::new(SnapshotJob::new(
                    schema.name.clone(),
                    shard.shard_id,
                    interval,
                    self.mem_store.clone(),
                    self.details.clone(),
                )));
            } else {
                self.details.report(&key, |d| {
                    d.job.status = JobStatus::Waiting;
                });
            }
        }
        jobs
    }
}

// ============================================================================
// Purge
// ============================================================================

pub struct PurgeJobManager {
    mem_store: Arc<MemStore>,
    pub(crate) details: DetailMap<PurgeJobDetail>,
}

impl PurgeJobManager {
    pub fn new(mem_store: Arc<MemStore>) -> Self {
        Self { mem_store, details: DetailMap::new() }
    }

    pub fn report_purge_job_detail<F: FnOnce(&mut PurgeJobDetail)>(&self, key: &str, f: F) {
        self.details.report(key, f);
    }

    pub fn get_job_detail(&self, key: &str) -> Option<PurgeJobDetail> {
        self.details.get(key)
    }
}

impl JobManager for PurgeJobManager {
    impl_job_manager_common!(JobType::Purge);

    fn generate_jobs(&self) -> Vec<Box<dyn Job>> {
        let now = utils::now();
        let mut jobs: Vec<Box<dyn Job>> = Vec::new();
        for shard in self.mem_store.all_shards() {
            let schema = &shard.schema;
            let retention = schema.config.record_retention_in_days;
            if !schema.is_fact_table || retention <= 0 {
                continue;
            }
            let key = job_identifier(&schema.name, shard.shard_id, JobType::Purge);
            if self.details.status(&key) == JobStatus::Running {
                continue;
            }
            // purge [0, cutoff_day): today and the retained days survive
            let cutoff_day = (now.timestamp() / 86400) as i32 - retention;
            let eligible = shard
                .archive_store
                .current_version()
                .days()
                .iter()
                .any(|&day| day < cutoff_day);
            self.details.report(&key, |d| {
                d.batch_id_start = 0;
                d.batch_id_end = cutoff_day;
                if eligible {
                    d.job.status = JobStatus::Ready;
                    d.job.next_run = None;
                } else {
                    d.job.status = JobStatus::Waiting;
                }
            });
            if eligible {
                jobs.push(Box::new(PurgeJob::new(
                    schema.name.clone(),
                    shard.shard_id,
                    0,
                    cutoff_day,
                    self.mem_store.clone(),
                    self.details.clone(),
                )));
            }
        }
        jobs
    }
}
