//! RPC Request/Response Types
//!
//! One params struct per method in §6.1's method table. Every call carries
//! an explicit `caller_id` — the transport has no session/auth layer of its
//! own, so the Permission Gate's identity check rides on this field.

use jobq_core::domain::{Job, JobId, LogLevel};
use serde::Deserialize;

fn default_true() -> bool {
    true
}

fn default_max_jobs() -> usize {
    1
}

#[derive(Debug, Deserialize)]
pub struct StartJobsRequest {
    pub caller_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StopJobsRequest {
    pub caller_id: String,
    /// Milliseconds to wait before force-failing still-running jobs.
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct JobSaveRequest {
    pub caller_id: String,
    pub id: Option<JobId>,
    pub job_type: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub after: i64,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub depends: Vec<JobId>,
    #[serde(default)]
    pub retries: i64,
    #[serde(default)]
    pub retry_wait: i64,
    #[serde(default)]
    pub repeats: i64,
    #[serde(default)]
    pub repeat_wait: i64,
    #[serde(default = "default_true")]
    pub cancel_repeats: bool,
}

#[derive(Debug, Deserialize)]
pub struct JobRerunRequest {
    pub caller_id: String,
    pub id: JobId,
    pub repeats: Option<i64>,
    pub wait: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct GetJobRequest {
    pub caller_id: String,
    pub ids: Vec<JobId>,
}

#[derive(Debug, Deserialize)]
pub struct GetWorkRequest {
    pub caller_id: String,
    pub types: Vec<String>,
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
}

#[derive(Debug, Deserialize)]
pub struct JobProgressRequest {
    pub caller_id: String,
    pub id: JobId,
    pub run_id: String,
    pub completed: i64,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct JobLogRequest {
    pub caller_id: String,
    pub id: JobId,
    pub run_id: String,
    pub message: String,
    #[serde(default)]
    pub level: Option<LogLevel>,
}

#[derive(Debug, Deserialize)]
pub struct JobDoneRequest {
    pub caller_id: String,
    pub id: JobId,
    pub run_id: String,
    pub result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct JobFailRequest {
    pub caller_id: String,
    pub id: JobId,
    pub run_id: String,
    pub err: String,
    #[serde(default)]
    pub fatal: bool,
}

#[derive(Debug, Deserialize)]
pub struct JobPauseRequest {
    pub caller_id: String,
    pub ids: Vec<JobId>,
}

#[derive(Debug, Deserialize)]
pub struct JobResumeRequest {
    pub caller_id: String,
    pub ids: Vec<JobId>,
}

#[derive(Debug, Deserialize)]
pub struct JobCancelRequest {
    pub caller_id: String,
    pub ids: Vec<JobId>,
    pub antecedents: Option<bool>,
    pub dependents: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct JobRestartRequest {
    pub caller_id: String,
    pub ids: Vec<JobId>,
    pub antecedents: Option<bool>,
    pub dependents: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct JobRemoveRequest {
    pub caller_id: String,
    pub ids: Vec<JobId>,
}

/// A `getJob`/`getWork` result row. `Job` already serializes to exactly the
/// document shape the wire needs; no separate DTO.
pub type JobDoc = Job;
