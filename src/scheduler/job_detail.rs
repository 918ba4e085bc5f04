//! Per-job progress and status records, reported as JSON.
//!
//! Every job key maps to one detail struct; all mutation goes through the
//! owning manager's `report_job_detail` under its lock. Times serialize
//! RFC3339 UTC; a never-set time serializes as null; zero-valued progress
//! counters are omitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job status state machine:
/// `ready → running → (succeeded | failed) → waiting → ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Ready,
    Running,
    Succeeded,
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Waiting
    }
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}

/// Fields common to every job kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    pub status: JobStatus,
    pub stage: String,
    /// When a waiting job should be re-evaluated; cleared while ready.
    pub next_run: Option<DateTime<Utc>>,
    pub last_start_time: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "is_zero_u64", default)]
    pub last_duration_ms: u64,
    #[serde(skip_serializing_if = "is_zero_u64", default)]
    pub lock_duration_ms: u64,
    #[serde(skip_serializing_if = "is_zero_u32", default)]
    pub current: u32,
    #[serde(skip_serializing_if = "is_zero_u32", default)]
    pub total: u32,
    #[serde(skip_serializing_if = "is_zero_usize", default)]
    pub num_records: usize,
    #[serde(skip_serializing_if = "is_zero_u32", default)]
    pub num_affected_days: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivingJobDetail {
    #[serde(flatten)]
    pub job: JobDetail,
    /// The shard's archiving cutoff at the last eligibility scan.
    pub current_cutoff: u32,
    /// Cutoff of the in-flight run, zero when idle.
    pub running_cutoff: u32,
    /// Cutoff published by the last successful run.
    pub last_cutoff: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillJobDetail {
    #[serde(flatten)]
    pub job: JobDetail,
    /// Redo-log checkpoint consumed up to, for crash recovery.
    pub redolog_file: i64,
    pub batch_offset: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotJobDetail {
    #[serde(flatten)]
    pub job: JobDetail,
    pub num_mutations: i64,
    pub num_batches: u32,
    pub redolog_file: i64,
    pub batch_offset: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeJobDetail {
    #[serde(flatten)]
    pub job: JobDetail,
    pub num_batches: u32,
    #[serde(rename = "batchIDStart")]
    pub batch_id_start: i32,
    #[serde(rename = "batchIDEnd")]
    pub batch_id_end: i32,
}
