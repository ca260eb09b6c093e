//! Wire request types, mirroring `api-rpc`'s `types.rs` field-for-field
//! (snake_case, no `rename_all`) so the params a client sends deserialize
//! identically on the daemon side.

use jobq_core::domain::{JobId, LogLevel};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct StartJobsRequest {
    pub caller_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopJobsRequest {
    pub caller_id: String,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSaveRequest {
    pub caller_id: String,
    pub id: Option<JobId>,
    pub job_type: String,
    pub data: serde_json::Value,
    pub priority: i32,
    pub after: i64,
    pub paused: bool,
    pub depends: Vec<JobId>,
    pub retries: i64,
    pub retry_wait: i64,
    pub repeats: i64,
    pub repeat_wait: i64,
    pub cancel_repeats: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRerunRequest {
    pub caller_id: String,
    pub id: JobId,
    pub repeats: Option<i64>,
    pub wait: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetJobRequest {
    pub caller_id: String,
    pub ids: Vec<JobId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetWorkRequest {
    pub caller_id: String,
    pub types: Vec<String>,
    pub max_jobs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobProgressRequest {
    pub caller_id: String,
    pub id: JobId,
    pub run_id: String,
    pub completed: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobLogRequest {
    pub caller_id: String,
    pub id: JobId,
    pub run_id: String,
    pub message: String,
    pub level: Option<LogLevel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDoneRequest {
    pub caller_id: String,
    pub id: JobId,
    pub run_id: String,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobFailRequest {
    pub caller_id: String,
    pub id: JobId,
    pub run_id: String,
    pub err: String,
    pub fatal: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobPauseRequest {
    pub caller_id: String,
    pub ids: Vec<JobId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResumeRequest {
    pub caller_id: String,
    pub ids: Vec<JobId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobCancelRequest {
    pub caller_id: String,
    pub ids: Vec<JobId>,
    pub antecedents: Option<bool>,
    pub dependents: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRestartRequest {
    pub caller_id: String,
    pub ids: Vec<JobId>,
    pub antecedents: Option<bool>,
    pub dependents: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRemoveRequest {
    pub caller_id: String,
    pub ids: Vec<JobId>,
}

/// Fields accepted by `jobSave`, mirroring `core::application::scheduler::JobSaveInput`
/// plus the `cancelRepeats` option, for callers that don't want to build the
/// wire request struct by hand.
#[derive(Debug, Clone, Default)]
pub struct SaveJob {
    pub id: Option<JobId>,
    pub job_type: String,
    pub data: serde_json::Value,
    pub priority: i32,
    pub after: i64,
    pub paused: bool,
    pub depends: Vec<JobId>,
    pub retries: i64,
    pub retry_wait: i64,
    pub repeats: i64,
    pub repeat_wait: i64,
    pub cancel_repeats: bool,
}

impl SaveJob {
    pub fn new(job_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            data,
            cancel_repeats: true,
            ..Default::default()
        }
    }
}
