// Job Domain Model — the state machine all mutation flows through.
//
// Mutations live as inherent methods on `Job` (start/complete/fail/...) that
// return `Result` and enforce preconditions, rather than free functions
// operating on a bag of fields.

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

pub type JobId = String;
pub type RunId = String;
pub type CollectionId = String;

/// Sentinel for "repeats forever" / "retries forever": the largest
/// representable non-negative integer. Comparisons against it must behave as
/// "always greater than zero" — never decrement past it.
pub const FOREVER: i64 = i64::MAX;

pub mod priority {
    pub const LOW: i32 = 10;
    pub const NORMAL: i32 = 0;
    pub const MEDIUM: i32 = -5;
    pub const HIGH: i32 = -10;
    pub const CRITICAL: i32 = -15;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Paused,
    Ready,
    Running,
    Failed,
    Cancelled,
    Completed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Paused => "paused",
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Cancelled | JobStatus::Completed
        )
    }

    /// Statuses §4.2's cancel cascade is allowed to touch.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            JobStatus::Running | JobStatus::Ready | JobStatus::Waiting | JobStatus::Paused
        )
    }

    /// Statuses §4.2's restart cascade is allowed to touch.
    pub fn is_restartable(self) -> bool {
        matches!(self, JobStatus::Cancelled | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Danger,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: i64,
    pub run_id: Option<RunId>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Progress {
    pub completed: i64,
    pub total: i64,
}

impl Progress {
    /// 100 * completed / total, defined as 0 when total is 0.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.completed as f64 / self.total as f64
        }
    }
}

/// The full job record. One document per job, no sidecars (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub collection: CollectionId,

    // Immutable after creation (§3.1).
    pub job_type: String,
    pub data: serde_json::Value,

    pub status: JobStatus,
    pub run_id: Option<RunId>,

    pub priority: i32,
    pub after: i64,

    pub created_at: i64,
    pub updated: i64,

    pub depends: Vec<JobId>,
    pub resolved: Vec<JobId>,

    pub retries: i64,
    pub retried: i64,
    pub retry_wait: i64,

    pub repeats: i64,
    pub repeated: i64,
    pub repeat_wait: i64,

    pub progress: Progress,
    pub log: Vec<LogEntry>,

    pub result: Option<serde_json::Value>,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        collection: impl Into<String>,
        job_type: impl Into<String>,
        data: serde_json::Value,
        priority: i32,
        after: i64,
        depends: Vec<JobId>,
        retries: i64,
        retry_wait: i64,
        repeats: i64,
        repeat_wait: i64,
        now: i64,
    ) -> Self {
        let status = if depends.is_empty() && after <= now {
            JobStatus::Ready
        } else {
            JobStatus::Waiting
        };
        Self {
            id: id.into(),
            collection: collection.into(),
            job_type: job_type.into(),
            data,
            status,
            run_id: None,
            priority,
            after,
            created_at: now,
            updated: now,
            depends,
            resolved: Vec::new(),
            retries,
            retried: 0,
            retry_wait,
            repeats,
            repeated: 0,
            repeat_wait,
            progress: Progress::default(),
            log: Vec::new(),
            result: None,
        }
    }

    /// Deterministic test constructor (counter-based id/timestamps), so
    /// assertions don't have to deal with real clock/uuid nondeterminism.
    #[cfg(test)]
    pub fn new_test(job_type: impl Into<String>, data: serde_json::Value) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);
        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let now = (counter * 1000) as i64;
        Self::new(
            format!("test-{counter}"),
            "default",
            job_type,
            data,
            priority::NORMAL,
            now,
            Vec::new(),
            0,
            0,
            0,
            0,
            now,
        )
    }

    fn append_log(&mut self, now: i64, level: LogLevel, message: impl Into<String>) {
        self.log.push(LogEntry {
            time: now,
            run_id: self.run_id.clone(),
            level,
            message: message.into(),
        });
    }

    fn invalid(&self, to: JobStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.status,
            to,
        }
    }

    /// waiting -> ready. Caller (Scheduler) has already checked `depends` is
    /// empty and `after <= now`; I2 holds by construction.
    pub fn promote(&mut self, now: i64) -> Result<()> {
        if self.status != JobStatus::Waiting {
            return Err(self.invalid(JobStatus::Ready));
        }
        if !self.depends.is_empty() || self.after > now {
            return Err(DomainError::PreconditionFailed(
                "job is not eligible for promotion yet".into(),
            ));
        }
        self.status = JobStatus::Ready;
        self.updated = now;
        Ok(())
    }

    /// ready -> running, with a fresh run_id (I1, I7).
    pub fn dispatch(&mut self, run_id: impl Into<String>, now: i64) -> Result<()> {
        if self.status != JobStatus::Ready {
            return Err(self.invalid(JobStatus::Running));
        }
        self.status = JobStatus::Running;
        self.run_id = Some(run_id.into());
        self.updated = now;
        self.append_log(now, LogLevel::Info, "dispatched");
        Ok(())
    }

    /// running -> completed.
    pub fn complete(&mut self, expected_run_id: &str, result: serde_json::Value, now: i64) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(self.invalid(JobStatus::Completed));
        }
        if self.run_id.as_deref() != Some(expected_run_id) {
            return Err(DomainError::PreconditionFailed("stale runId".into()));
        }
        self.status = JobStatus::Completed;
        self.run_id = None;
        self.result = Some(result);
        self.updated = now;
        self.append_log(now, LogLevel::Success, "completed");
        Ok(())
    }

    /// running -> waiting (retry) or running -> failed (exhausted/fatal).
    /// Returns true if the job will be retried.
    pub fn fail(&mut self, expected_run_id: &str, fatal: bool, message: impl Into<String>, now: i64) -> Result<bool> {
        if self.status != JobStatus::Running {
            return Err(self.invalid(JobStatus::Failed));
        }
        if self.run_id.as_deref() != Some(expected_run_id) {
            return Err(DomainError::PreconditionFailed("stale runId".into()));
        }
        self.append_log(now, LogLevel::Danger, message);
        self.run_id = None;
        self.updated = now;
        if self.retries > 0 && !fatal {
            if self.retries != FOREVER {
                self.retries -= 1;
            }
            if self.retried != FOREVER {
                self.retried += 1;
            }
            self.status = JobStatus::Waiting;
            self.after = now + self.retry_wait;
            Ok(true)
        } else {
            self.status = JobStatus::Failed;
            Ok(false)
        }
    }

    /// Idempotent progress update. Fails only on a stale runId — the caller
    /// decides (via configuration) whether that surfaces as `false` or `null`.
    pub fn set_progress(&mut self, expected_run_id: &str, completed: i64, total: i64, now: i64) -> Result<()> {
        if self.status != JobStatus::Running || self.run_id.as_deref() != Some(expected_run_id) {
            return Err(DomainError::PreconditionFailed("stale runId".into()));
        }
        self.progress = Progress { completed, total };
        self.updated = now;
        Ok(())
    }

    pub fn add_log(&mut self, expected_run_id: &str, level: LogLevel, message: impl Into<String>, now: i64) -> Result<()> {
        if self.status != JobStatus::Running || self.run_id.as_deref() != Some(expected_run_id) {
            return Err(DomainError::PreconditionFailed("stale runId".into()));
        }
        self.append_log(now, level, message);
        self.updated = now;
        Ok(())
    }

    /// Move `dep` from `depends` to `resolved`. Idempotent: a repeated call
    /// for an already-resolved dependency is a no-op (§5).
    pub fn resolve_dependency(&mut self, dep: &str, now: i64) {
        if let Some(pos) = self.depends.iter().position(|d| d == dep) {
            let id = self.depends.remove(pos);
            if !self.resolved.contains(&id) {
                self.resolved.push(id);
            }
            self.updated = now;
        }
    }

    /// Any cancellable status -> cancelled.
    pub fn cancel(&mut self, now: i64) -> Result<()> {
        if !self.status.is_cancellable() {
            return Err(self.invalid(JobStatus::Cancelled));
        }
        self.status = JobStatus::Cancelled;
        self.run_id = None;
        self.updated = now;
        self.append_log(now, LogLevel::Warning, "cancelled");
        Ok(())
    }

    /// cancelled/failed -> waiting, immediately eligible (after = now).
    pub fn restart(&mut self, now: i64) -> Result<()> {
        if !self.status.is_restartable() {
            return Err(self.invalid(JobStatus::Waiting));
        }
        self.status = JobStatus::Waiting;
        self.run_id = None;
        self.after = now;
        self.updated = now;
        self.append_log(now, LogLevel::Info, "restarted");
        Ok(())
    }

    pub fn pause(&mut self, now: i64) -> Result<()> {
        if !matches!(self.status, JobStatus::Waiting | JobStatus::Ready) {
            return Err(self.invalid(JobStatus::Paused));
        }
        self.status = JobStatus::Paused;
        self.updated = now;
        Ok(())
    }

    pub fn resume(&mut self, now: i64) -> Result<()> {
        if self.status != JobStatus::Paused {
            return Err(self.invalid(JobStatus::Waiting));
        }
        self.status = JobStatus::Waiting;
        self.updated = now;
        Ok(())
    }

    /// Force-fail a job found `running` at startup (§6.3 recovery sweep).
    pub fn force_fail(&mut self, message: impl Into<String>, now: i64) {
        self.append_log(now, LogLevel::Danger, message);
        self.status = JobStatus::Failed;
        self.run_id = None;
        self.updated = now;
    }

    /// Build the new waiting sibling spawned when a completed job has
    /// `repeats` remaining (§4.2 completion cascade). Caller assigns a fresh id.
    pub fn spawn_repeat(&self, new_id: impl Into<String>, now: i64) -> Option<Job> {
        if self.repeats <= 0 {
            return None;
        }
        let mut next = self.clone();
        next.id = new_id.into();
        next.status = JobStatus::Waiting;
        next.run_id = None;
        next.after = now + self.repeat_wait;
        next.created_at = now;
        next.updated = now;
        next.repeated = if self.repeated == FOREVER {
            FOREVER
        } else {
            self.repeated + 1
        };
        next.repeats = if self.repeats == FOREVER {
            FOREVER
        } else {
            self.repeats - 1
        };
        next.progress = Progress::default();
        next.log = Vec::new();
        next.result = None;
        next.depends = Vec::new();
        next.resolved = Vec::new();
        Some(next)
    }

    pub fn is_eligible_for_promotion(&self, now: i64) -> bool {
        self.status == JobStatus::Waiting && self.depends.is_empty() && self.after <= now
    }
}

/// Ordering for dispatch candidate selection (§4.1 tie-breaks): priority
/// ascending (lower = sooner), then `after` ascending, then `updated` ascending.
pub fn dispatch_order_key(job: &Job) -> (i32, i64, i64) {
    (job.priority, job.after, job.updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> serde_json::Value {
        serde_json::json!({})
    }

    #[test]
    fn new_job_without_deps_or_delay_is_ready() {
        let job = Job::new_test("t", data());
        assert_eq!(job.status, JobStatus::Ready);
    }

    #[test]
    fn new_job_with_deps_is_waiting() {
        let mut job = Job::new_test("t", data());
        job.depends = vec!["other".into()];
        job.status = JobStatus::Waiting;
        assert_eq!(job.status, JobStatus::Waiting);
    }

    #[test]
    fn dispatch_requires_ready() {
        let mut job = Job::new_test("t", data());
        job.status = JobStatus::Waiting;
        assert!(job.dispatch("run-1", 1000).is_err());
    }

    #[test]
    fn full_success_lifecycle() {
        let mut job = Job::new_test("t", data());
        job.dispatch("run-1", 1000).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.run_id.as_deref(), Some("run-1"));

        job.complete("run-1", serde_json::json!({"ok": true}), 2000).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.run_id.is_none());
        assert_eq!(job.result, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn complete_rejects_stale_run_id() {
        let mut job = Job::new_test("t", data());
        job.dispatch("run-1", 1000).unwrap();
        assert!(job.complete("run-2", data(), 2000).is_err());
    }

    #[test]
    fn fail_retries_then_exhausts() {
        let mut job = Job::new_test("t", data());
        job.retries = 2;
        job.retry_wait = 500;

        job.dispatch("run-1", 1000).unwrap();
        let retried = job.fail("run-1", false, "boom", 1500).unwrap();
        assert!(retried);
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.retries, 1);
        assert_eq!(job.retried, 1);
        assert_eq!(job.after, 2000);

        job.status = JobStatus::Ready;
        job.dispatch("run-2", 2000).unwrap();
        let retried = job.fail("run-2", false, "boom again", 2500).unwrap();
        assert!(retried);
        assert_eq!(job.retries, 0);
        assert_eq!(job.retried, 2);

        job.status = JobStatus::Ready;
        job.dispatch("run-3", 3000).unwrap();
        let retried = job.fail("run-3", false, "final", 3500).unwrap();
        assert!(!retried);
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn fatal_failure_skips_retry() {
        let mut job = Job::new_test("t", data());
        job.retries = 5;
        job.dispatch("run-1", 1000).unwrap();
        let retried = job.fail("run-1", true, "fatal", 1500).unwrap();
        assert!(!retried);
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn forever_retries_never_decrement() {
        let mut job = Job::new_test("t", data());
        job.retries = FOREVER;
        job.dispatch("run-1", 1000).unwrap();
        job.fail("run-1", false, "boom", 1500).unwrap();
        assert_eq!(job.retries, FOREVER);
    }

    #[test]
    fn cancel_then_restart() {
        let mut job = Job::new_test("t", data());
        job.cancel(1000).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        job.restart(2000).unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.after, 2000);
    }

    #[test]
    fn cancel_idempotent_fails_when_terminal_already() {
        let mut job = Job::new_test("t", data());
        job.cancel(1000).unwrap();
        assert!(job.cancel(2000).is_err());
    }

    #[test]
    fn resolve_dependency_is_idempotent() {
        let mut job = Job::new_test("t", data());
        job.depends = vec!["dep-1".into()];
        job.resolve_dependency("dep-1", 1000);
        assert!(job.depends.is_empty());
        assert_eq!(job.resolved, vec!["dep-1".to_string()]);
        job.resolve_dependency("dep-1", 2000);
        assert_eq!(job.resolved, vec!["dep-1".to_string()]);
    }

    #[test]
    fn progress_percent_handles_zero_total() {
        let p = Progress { completed: 0, total: 0 };
        assert_eq!(p.percent(), 0.0);
        let p = Progress { completed: 5, total: 10 };
        assert_eq!(p.percent(), 50.0);
    }

    #[test]
    fn spawn_repeat_clones_sibling_with_fresh_state() {
        let mut job = Job::new_test("t", data());
        job.repeats = 1;
        job.repeat_wait = 100;
        job.dispatch("run-1", 1000).unwrap();
        job.complete("run-1", data(), 2000).unwrap();

        let sibling = job.spawn_repeat("next-id", 2000).unwrap();
        assert_eq!(sibling.status, JobStatus::Waiting);
        assert_eq!(sibling.after, 2100);
        assert_eq!(sibling.repeated, 1);
        assert_eq!(sibling.repeats, 0);
        assert!(sibling.log.is_empty());
    }
}
