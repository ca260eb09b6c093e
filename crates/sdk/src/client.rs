//! JSON-RPC client for the jobq daemon.
//!
//! Every call carries the client's configured `caller_id` and is sent under
//! `"<collection>.<method>"` (§6.1's multi-collection method naming).
//! `JobqClient` also implements `core::application::JobQueue`'s `WorkSource`
//! port, so it can be handed directly to a `JobQueue` running on a worker
//! host.

use crate::error::{Result, SdkError};
use crate::types::{
    GetJobRequest, GetWorkRequest, JobCancelRequest, JobDoneRequest, JobFailRequest,
    JobLogRequest, JobPauseRequest, JobProgressRequest, JobRemoveRequest, JobRerunRequest,
    JobResumeRequest, JobRestartRequest, JobSaveRequest, SaveJob, StartJobsRequest,
    StopJobsRequest,
};
use async_trait::async_trait;
use jobq_core::application::{ReportOutcome, WorkSource};
use jobq_core::domain::{Job, JobId, LogLevel};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use std::time::Duration;

const DEFAULT_COLLECTION: &str = "default";

pub struct JobqClient {
    client: HttpClient,
    collection: String,
    caller_id: String,
}

impl JobqClient {
    /// Connect to a daemon at `url` (e.g. `http://127.0.0.1:9527`),
    /// identifying every call as `caller_id` against the Permission Gate.
    pub async fn connect(url: impl AsRef<str>, caller_id: impl Into<String>) -> Result<Self> {
        Self::connect_collection(url, DEFAULT_COLLECTION, caller_id).await
    }

    pub async fn connect_collection(
        url: impl AsRef<str>,
        collection: impl Into<String>,
        caller_id: impl Into<String>,
    ) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .build(url.as_ref())
            .map_err(|e| SdkError::Connection(format!("failed to create client: {e}")))?;

        Ok(Self {
            client,
            collection: collection.into(),
            caller_id: caller_id.into(),
        })
    }

    fn method(&self, name: &str) -> String {
        format!("{}.{}", self.collection, name)
    }

    pub async fn start_jobs(&self) -> Result<bool> {
        let req = StartJobsRequest { caller_id: self.caller_id.clone() };
        let params = rpc_params![req];
        Ok(self.client.request(&self.method("startJobs"), params).await?)
    }

    pub async fn stop_jobs(&self, timeout: Option<Duration>) -> Result<bool> {
        let req = StopJobsRequest {
            caller_id: self.caller_id.clone(),
            timeout: timeout.map(|d| d.as_millis() as u64),
        };
        let params = rpc_params![req];
        Ok(self.client.request(&self.method("stopJobs"), params).await?)
    }

    pub async fn job_save(&self, job: SaveJob) -> Result<JobId> {
        let req = JobSaveRequest {
            caller_id: self.caller_id.clone(),
            id: job.id,
            job_type: job.job_type,
            data: job.data,
            priority: job.priority,
            after: job.after,
            paused: job.paused,
            depends: job.depends,
            retries: job.retries,
            retry_wait: job.retry_wait,
            repeats: job.repeats,
            repeat_wait: job.repeat_wait,
            cancel_repeats: job.cancel_repeats,
        };
        let params = rpc_params![req];
        Ok(self.client.request(&self.method("jobSave"), params).await?)
    }

    pub async fn job_rerun(&self, id: &JobId, repeats: Option<i64>, wait: Option<i64>) -> Result<JobId> {
        let req = JobRerunRequest { caller_id: self.caller_id.clone(), id: id.clone(), repeats, wait };
        let params = rpc_params![req];
        Ok(self.client.request(&self.method("jobRerun"), params).await?)
    }

    pub async fn get_job(&self, ids: &[JobId]) -> Result<Vec<Job>> {
        let req = GetJobRequest { caller_id: self.caller_id.clone(), ids: ids.to_vec() };
        let params = rpc_params![req];
        Ok(self.client.request(&self.method("getJob"), params).await?)
    }

    pub async fn job_pause(&self, ids: &[JobId]) -> Result<bool> {
        let req = JobPauseRequest { caller_id: self.caller_id.clone(), ids: ids.to_vec() };
        let params = rpc_params![req];
        Ok(self.client.request(&self.method("jobPause"), params).await?)
    }

    pub async fn job_resume(&self, ids: &[JobId]) -> Result<bool> {
        let req = JobResumeRequest { caller_id: self.caller_id.clone(), ids: ids.to_vec() };
        let params = rpc_params![req];
        Ok(self.client.request(&self.method("jobResume"), params).await?)
    }

    pub async fn job_cancel(&self, ids: &[JobId], antecedents: Option<bool>, dependents: Option<bool>) -> Result<bool> {
        let req = JobCancelRequest { caller_id: self.caller_id.clone(), ids: ids.to_vec(), antecedents, dependents };
        let params = rpc_params![req];
        Ok(self.client.request(&self.method("jobCancel"), params).await?)
    }

    pub async fn job_restart(&self, ids: &[JobId], antecedents: Option<bool>, dependents: Option<bool>) -> Result<bool> {
        let req = JobRestartRequest { caller_id: self.caller_id.clone(), ids: ids.to_vec(), antecedents, dependents };
        let params = rpc_params![req];
        Ok(self.client.request(&self.method("jobRestart"), params).await?)
    }

    pub async fn job_remove(&self, ids: &[JobId]) -> Result<bool> {
        let req = JobRemoveRequest { caller_id: self.caller_id.clone(), ids: ids.to_vec() };
        let params = rpc_params![req];
        Ok(self.client.request(&self.method("jobRemove"), params).await?)
    }

    /// `null` on the wire is ambiguous between `ShuttingDown` and a
    /// `Stale` result under `stale_progress_returns_null=true` (§7/§9) —
    /// this client treats it as `ShuttingDown`, the more common
    /// default-configuration case and the one a worker must act on
    /// (stop reporting) rather than silently ignore.
    fn outcome_from_json(value: serde_json::Value) -> ReportOutcome {
        match value {
            serde_json::Value::Bool(true) => ReportOutcome::Ok,
            serde_json::Value::Bool(false) => ReportOutcome::Stale,
            serde_json::Value::String(s) if s == "canceled" => ReportOutcome::Canceled,
            serde_json::Value::Null => ReportOutcome::ShuttingDown,
            _ => ReportOutcome::Stale,
        }
    }
}

#[async_trait]
impl WorkSource for JobqClient {
    async fn get_work(&self, types: &[String], max_jobs: usize) -> jobq_core::error::Result<Vec<Job>> {
        let req = GetWorkRequest {
            caller_id: self.caller_id.clone(),
            types: types.to_vec(),
            max_jobs,
        };
        let params = rpc_params![req];
        self.client
            .request(&self.method("getWork"), params)
            .await
            .map_err(|e| SdkError::from(e).into())
    }

    async fn progress(&self, id: &JobId, run_id: &str, completed: i64, total: i64) -> jobq_core::error::Result<ReportOutcome> {
        let req = JobProgressRequest {
            caller_id: self.caller_id.clone(),
            id: id.clone(),
            run_id: run_id.to_string(),
            completed,
            total,
        };
        let params = rpc_params![req];
        let value: serde_json::Value = self
            .client
            .request(&self.method("jobProgress"), params)
            .await
            .map_err(|e| jobq_core::error::AppError::from(SdkError::from(e)))?;
        Ok(Self::outcome_from_json(value))
    }

    async fn log(&self, id: &JobId, run_id: &str, level: LogLevel, message: &str) -> jobq_core::error::Result<ReportOutcome> {
        let req = JobLogRequest {
            caller_id: self.caller_id.clone(),
            id: id.clone(),
            run_id: run_id.to_string(),
            message: message.to_string(),
            level: Some(level),
        };
        let params = rpc_params![req];
        let value: serde_json::Value = self
            .client
            .request(&self.method("jobLog"), params)
            .await
            .map_err(|e| jobq_core::error::AppError::from(SdkError::from(e)))?;
        Ok(Self::outcome_from_json(value))
    }

    async fn done(&self, id: &JobId, run_id: &str, result: serde_json::Value) -> jobq_core::error::Result<ReportOutcome> {
        let req = JobDoneRequest {
            caller_id: self.caller_id.clone(),
            id: id.clone(),
            run_id: run_id.to_string(),
            result,
        };
        let params = rpc_params![req];
        let value: serde_json::Value = self
            .client
            .request(&self.method("jobDone"), params)
            .await
            .map_err(|e| jobq_core::error::AppError::from(SdkError::from(e)))?;
        Ok(Self::outcome_from_json(value))
    }

    async fn fail(&self, id: &JobId, run_id: &str, message: &str, fatal: bool) -> jobq_core::error::Result<ReportOutcome> {
        let req = JobFailRequest {
            caller_id: self.caller_id.clone(),
            id: id.clone(),
            run_id: run_id.to_string(),
            err: message.to_string(),
            fatal,
        };
        let params = rpc_params![req];
        let value: serde_json::Value = self
            .client
            .request(&self.method("jobFail"), params)
            .await
            .map_err(|e| jobq_core::error::AppError::from(SdkError::from(e)))?;
        Ok(Self::outcome_from_json(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_are_collection_qualified() {
        // Construction requires a live connection; the qualification
        // itself is pure string formatting and is exercised directly.
        let collection = "default".to_string();
        let name = format!("{collection}.{}", "getWork");
        assert_eq!(name, "default.getWork");
    }

    #[test]
    fn outcome_from_json_distinguishes_all_four_results() {
        assert_eq!(JobqClient::outcome_from_json(serde_json::json!(true)), ReportOutcome::Ok);
        assert_eq!(JobqClient::outcome_from_json(serde_json::json!(false)), ReportOutcome::Stale);
        assert_eq!(JobqClient::outcome_from_json(serde_json::Value::Null), ReportOutcome::ShuttingDown);
        assert_eq!(
            JobqClient::outcome_from_json(serde_json::json!("canceled")),
            ReportOutcome::Canceled
        );
    }
}
