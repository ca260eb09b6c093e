//! RPC Method Handlers
//!
//! One method per §6.1 row: rate limiter check, Permission Gate check,
//! dispatch log line, call into the `Scheduler`, result log line, with
//! `to_rpc_error` mapping at every fallible call.

use crate::error::to_rpc_error;
use crate::rate_limiter::RateLimiter;
use crate::types::{
    GetJobRequest, GetWorkRequest, JobCancelRequest, JobDoneRequest, JobFailRequest,
    JobLogRequest, JobPauseRequest, JobProgressRequest, JobRemoveRequest, JobRerunRequest,
    JobResumeRequest, JobRestartRequest, JobSaveRequest, StartJobsRequest, StopJobsRequest,
};
use jobq_core::application::gate::tag;
use jobq_core::application::{
    CancelOptions, JobSaveInput, JobSaveOptions, PermissionGate, ReportOutcome, RerunOptions,
    RestartOptions, Scheduler,
};
use jobq_core::domain::{Job, LogLevel};
use jobq_core::port::{log_sink, TimeProvider};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use std::time::Duration;

fn rate_limit_error() -> ErrorObjectOwned {
    jsonrpsee::types::error::ErrorObject::owned(
        crate::error::code::THROTTLED,
        "Rate limit exceeded. Please slow down.",
        None::<()>,
    )
}

pub struct RpcHandler {
    scheduler: Arc<Scheduler>,
    gate: Arc<PermissionGate>,
    rate_limiter: Arc<RateLimiter>,
    time: Arc<dyn TimeProvider>,
}

impl RpcHandler {
    pub fn new(
        scheduler: Arc<Scheduler>,
        gate: Arc<PermissionGate>,
        rate_limiter: Arc<RateLimiter>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self { scheduler, gate, rate_limiter, time }
    }

    /// Gate + dispatch-log check shared by every method. Returns an error
    /// (without mutating anything) if the caller isn't authorised.
    fn authorise(&self, caller_id: &str, method: &str, params: &serde_json::Value, tags: &[&str]) -> Result<(), ErrorObjectOwned> {
        let now = self.time.now_millis();
        log_sink::log_dispatch(now, caller_id, method, params);
        if !self.gate.is_authorised(caller_id, method, params, tags) {
            log_sink::log_unauthorised(now, caller_id, method);
            return Err(jsonrpsee::types::error::ErrorObject::owned(
                crate::error::code::NOT_AUTHORISED,
                format!("caller {caller_id} is not authorised to call {method}"),
                None::<()>,
            ));
        }
        Ok(())
    }

    fn log_result(&self, caller_id: &str, method: &str, result: &serde_json::Value) {
        log_sink::log_result(self.time.now_millis(), caller_id, method, result);
    }

    pub async fn start_jobs(&self, params: StartJobsRequest) -> Result<bool, ErrorObjectOwned> {
        self.authorise(&params.caller_id, "startJobs", &serde_json::json!({}), &[tag::ADMIN, "startJobs"])?;
        let result = self.scheduler.start_jobs();
        self.log_result(&params.caller_id, "startJobs", &serde_json::json!(result));
        Ok(result)
    }

    pub async fn stop_jobs(&self, params: StopJobsRequest) -> Result<bool, ErrorObjectOwned> {
        self.authorise(
            &params.caller_id,
            "stopJobs",
            &serde_json::json!({"timeout": params.timeout}),
            &[tag::ADMIN, "stopJobs"],
        )?;
        let timeout = params.timeout.map(Duration::from_millis);
        let result = self.scheduler.stop_jobs(timeout).await.map_err(to_rpc_error)?;
        self.log_result(&params.caller_id, "stopJobs", &serde_json::json!(result));
        Ok(result)
    }

    pub async fn job_save(&self, params: JobSaveRequest) -> Result<String, ErrorObjectOwned> {
        if !self.rate_limiter.check().await {
            return Err(rate_limit_error());
        }
        let payload = serde_json::json!({
            "id": params.id, "jobType": params.job_type, "data": params.data,
        });
        self.authorise(&params.caller_id, "jobSave", &payload, &[tag::ADMIN, tag::CREATOR, "jobSave"])?;

        let input = JobSaveInput {
            id: params.id,
            job_type: params.job_type,
            data: params.data,
            priority: params.priority,
            after: params.after,
            paused: params.paused,
            depends: params.depends,
            retries: params.retries,
            retry_wait: params.retry_wait,
            repeats: params.repeats,
            repeat_wait: params.repeat_wait,
        };
        let options = JobSaveOptions { cancel_repeats: params.cancel_repeats };
        let id = self.scheduler.save(input, options).await.map_err(to_rpc_error)?;
        self.log_result(&params.caller_id, "jobSave", &serde_json::json!(id));
        Ok(id)
    }

    pub async fn job_rerun(&self, params: JobRerunRequest) -> Result<String, ErrorObjectOwned> {
        if !self.rate_limiter.check().await {
            return Err(rate_limit_error());
        }
        self.authorise(
            &params.caller_id,
            "jobRerun",
            &serde_json::json!({"id": params.id}),
            &[tag::ADMIN, tag::CREATOR, "jobRerun"],
        )?;
        let options = RerunOptions { repeats: params.repeats, wait: params.wait };
        let id = self.scheduler.rerun(&params.id, options).await.map_err(to_rpc_error)?;
        self.log_result(&params.caller_id, "jobRerun", &serde_json::json!(id));
        Ok(id)
    }

    pub async fn get_job(&self, params: GetJobRequest) -> Result<Vec<Job>, ErrorObjectOwned> {
        self.authorise(
            &params.caller_id,
            "getJob",
            &serde_json::json!({"ids": params.ids}),
            &[tag::ADMIN, tag::WORKER, "getJob"],
        )?;
        let jobs = self.scheduler.get_job(&params.ids).await.map_err(to_rpc_error)?;
        self.log_result(&params.caller_id, "getJob", &serde_json::json!(jobs.len()));
        Ok(jobs)
    }

    pub async fn get_work(&self, params: GetWorkRequest) -> Result<Vec<Job>, ErrorObjectOwned> {
        if !self.rate_limiter.check().await {
            return Err(rate_limit_error());
        }
        self.authorise(
            &params.caller_id,
            "getWork",
            &serde_json::json!({"types": params.types}),
            &[tag::ADMIN, tag::WORKER, "getWork"],
        )?;
        let jobs = self
            .scheduler
            .get_work(&params.types, params.max_jobs)
            .await
            .map_err(to_rpc_error)?;
        self.log_result(&params.caller_id, "getWork", &serde_json::json!(jobs.len()));
        Ok(jobs)
    }

    /// §7: `ShutdownInProgress` maps to a bare JSON `null`, the stale-runId
    /// case maps to `false`/`null` per `stale_progress_returns_null`, and
    /// `Canceled` must be distinguishable from a plain `false` (§5: "MUST
    /// return a distinguished canceled result") — represented here as the
    /// JSON string `"canceled"`, since `bool|null` alone can't carry it.
    fn outcome_to_json(&self, outcome: ReportOutcome) -> serde_json::Value {
        match outcome {
            ReportOutcome::Ok => serde_json::json!(true),
            ReportOutcome::Stale => {
                if self.scheduler.stale_progress_returns_null() {
                    serde_json::Value::Null
                } else {
                    serde_json::json!(false)
                }
            }
            ReportOutcome::Canceled => serde_json::json!("canceled"),
            ReportOutcome::ShuttingDown => serde_json::Value::Null,
        }
    }

    pub async fn job_progress(&self, params: JobProgressRequest) -> Result<serde_json::Value, ErrorObjectOwned> {
        if !self.rate_limiter.check().await {
            return Err(rate_limit_error());
        }
        self.authorise(
            &params.caller_id,
            "jobProgress",
            &serde_json::json!({"id": params.id, "runId": params.run_id}),
            &[tag::ADMIN, tag::WORKER, "jobProgress"],
        )?;
        let outcome = self
            .scheduler
            .progress(&params.id, &params.run_id, params.completed, params.total)
            .await
            .map_err(to_rpc_error)?;
        let result = self.outcome_to_json(outcome);
        self.log_result(&params.caller_id, "jobProgress", &result);
        Ok(result)
    }

    pub async fn job_log(&self, params: JobLogRequest) -> Result<serde_json::Value, ErrorObjectOwned> {
        if !self.rate_limiter.check().await {
            return Err(rate_limit_error());
        }
        self.authorise(
            &params.caller_id,
            "jobLog",
            &serde_json::json!({"id": params.id, "runId": params.run_id}),
            &[tag::ADMIN, tag::WORKER, "jobLog"],
        )?;
        let level = params.level.unwrap_or(LogLevel::Info);
        let outcome = self
            .scheduler
            .log(&params.id, &params.run_id, &params.message, level)
            .await
            .map_err(to_rpc_error)?;
        let result = self.outcome_to_json(outcome);
        self.log_result(&params.caller_id, "jobLog", &result);
        Ok(result)
    }

    pub async fn job_done(&self, params: JobDoneRequest) -> Result<serde_json::Value, ErrorObjectOwned> {
        if !self.rate_limiter.check().await {
            return Err(rate_limit_error());
        }
        self.authorise(
            &params.caller_id,
            "jobDone",
            &serde_json::json!({"id": params.id, "runId": params.run_id}),
            &[tag::ADMIN, tag::WORKER, "jobDone"],
        )?;
        let outcome = self
            .scheduler
            .done(&params.id, &params.run_id, params.result)
            .await
            .map_err(to_rpc_error)?;
        let result = self.outcome_to_json(outcome);
        self.log_result(&params.caller_id, "jobDone", &result);
        Ok(result)
    }

    pub async fn job_fail(&self, params: JobFailRequest) -> Result<serde_json::Value, ErrorObjectOwned> {
        if !self.rate_limiter.check().await {
            return Err(rate_limit_error());
        }
        self.authorise(
            &params.caller_id,
            "jobFail",
            &serde_json::json!({"id": params.id, "runId": params.run_id}),
            &[tag::ADMIN, tag::WORKER, "jobFail"],
        )?;
        let outcome = self
            .scheduler
            .fail(&params.id, &params.run_id, &params.err, params.fatal)
            .await
            .map_err(to_rpc_error)?;
        let result = self.outcome_to_json(outcome);
        self.log_result(&params.caller_id, "jobFail", &result);
        Ok(result)
    }

    pub async fn job_pause(&self, params: JobPauseRequest) -> Result<bool, ErrorObjectOwned> {
        self.authorise(
            &params.caller_id,
            "jobPause",
            &serde_json::json!({"ids": params.ids}),
            &[tag::ADMIN, tag::MANAGER, "jobPause"],
        )?;
        let result = self.scheduler.pause(&params.ids).await.map_err(to_rpc_error)?;
        self.log_result(&params.caller_id, "jobPause", &serde_json::json!(result));
        Ok(result)
    }

    pub async fn job_resume(&self, params: JobResumeRequest) -> Result<bool, ErrorObjectOwned> {
        self.authorise(
            &params.caller_id,
            "jobResume",
            &serde_json::json!({"ids": params.ids}),
            &[tag::ADMIN, tag::MANAGER, "jobResume"],
        )?;
        let result = self.scheduler.resume(&params.ids).await.map_err(to_rpc_error)?;
        self.log_result(&params.caller_id, "jobResume", &serde_json::json!(result));
        Ok(result)
    }

    pub async fn job_cancel(&self, params: JobCancelRequest) -> Result<bool, ErrorObjectOwned> {
        self.authorise(
            &params.caller_id,
            "jobCancel",
            &serde_json::json!({"ids": params.ids}),
            &[tag::ADMIN, tag::MANAGER, "jobCancel"],
        )?;
        let mut options = CancelOptions::spec_default();
        if let Some(a) = params.antecedents {
            options.antecedents = a;
        }
        if let Some(d) = params.dependents {
            options.dependents = d;
        }
        let result = self.scheduler.cancel(&params.ids, options).await.map_err(to_rpc_error)?;
        self.log_result(&params.caller_id, "jobCancel", &serde_json::json!(result));
        Ok(result)
    }

    pub async fn job_restart(&self, params: JobRestartRequest) -> Result<bool, ErrorObjectOwned> {
        self.authorise(
            &params.caller_id,
            "jobRestart",
            &serde_json::json!({"ids": params.ids}),
            &[tag::ADMIN, tag::MANAGER, "jobRestart"],
        )?;
        let mut options = RestartOptions::spec_default();
        if let Some(a) = params.antecedents {
            options.antecedents = a;
        }
        if let Some(d) = params.dependents {
            options.dependents = d;
        }
        let result = self.scheduler.restart(&params.ids, options).await.map_err(to_rpc_error)?;
        self.log_result(&params.caller_id, "jobRestart", &serde_json::json!(result));
        Ok(result)
    }

    pub async fn job_remove(&self, params: JobRemoveRequest) -> Result<bool, ErrorObjectOwned> {
        self.authorise(
            &params.caller_id,
            "jobRemove",
            &serde_json::json!({"ids": params.ids}),
            &[tag::ADMIN, tag::MANAGER, "jobRemove"],
        )?;
        let removed = self.scheduler.remove(&params.ids).await.map_err(to_rpc_error)?;
        let result = removed > 0;
        self.log_result(&params.caller_id, "jobRemove", &serde_json::json!(result));
        Ok(result)
    }
}
