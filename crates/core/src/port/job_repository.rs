// Record Store Adapter port (§4.5) — findOne/find/insert/findAndModify.
//
// `compare_and_swap` realizes findAndModify directly: the caller mutates an
// in-memory `Job` (via its state-machine methods) and the adapter only
// commits the result if the document still matches the expected status (and
// run_id, when relevant) — exactly "previousDoc | null".

use crate::domain::{Job, JobId, JobStatus};
use crate::error::Result;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub enum JobFilter {
    All,
    ByStatus(Vec<JobStatus>),
    ByType(Vec<String>),
    ByIds(Vec<JobId>),
    /// Jobs that list `dep` anywhere in their `depends` list.
    DependsOn(JobId),
    /// Jobs of `job_type`, in a cancellable status, with `repeats == FOREVER`,
    /// excluding `exclude_id` — used by jobSave's cancelRepeats.
    RepeatingOfType { job_type: String, exclude_id: JobId },
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;

    async fn find_one(&self, collection: &str, id: &JobId) -> Result<Option<Job>>;

    async fn find(&self, collection: &str, filter: JobFilter) -> Result<Vec<Job>>;

    /// Bulk CAS: every `waiting` job in `collection` with empty `depends` and
    /// `after <= now` becomes `ready`. Returns the number promoted.
    async fn promote_ready(&self, collection: &str, now: i64) -> Result<u64>;

    /// Atomically pop one `ready` job of any of `types` into `running` with a
    /// fresh run_id, ordered by the §4.1 tie-break rule. None if no candidate.
    async fn dispatch_one(
        &self,
        collection: &str,
        types: &[String],
        run_id: &str,
        now: i64,
    ) -> Result<Option<Job>>;

    /// findAndModify: replace the document at `new_job.id` with `new_job`
    /// iff it currently has `expected_status` (and, when given, `expected_run_id`).
    /// Returns the previous document on success, `None` on precondition failure.
    async fn compare_and_swap(
        &self,
        collection: &str,
        expected_status: JobStatus,
        expected_run_id: Option<&str>,
        new_job: &Job,
    ) -> Result<Option<Job>>;

    async fn remove(&self, collection: &str, ids: &[JobId]) -> Result<u64>;

    /// Recovery sweep: force-fail every job found `running`, returning the
    /// jobs that were changed.
    async fn force_fail_running(&self, collection: &str, now: i64, message: &str) -> Result<Vec<Job>>;

    async fn gc_terminal_before(&self, collection: &str, cutoff: i64) -> Result<u64>;

    async fn count_by_status(&self, collection: &str, status: JobStatus) -> Result<i64>;
}
