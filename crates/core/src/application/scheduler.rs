// Scheduler (§4.2) — promotion loop, dispatch (`getWork`), completion and
// cancel/restart cascades, plus the mutation entry points (`jobSave`,
// `jobRerun`, `jobProgress`, `jobLog`, `jobDone`, `jobFail`, `jobPause`,
// `jobResume`, `jobCancel`, `jobRestart`, `jobRemove`) that the RPC layer
// calls after the Permission Gate has cleared a request. One Scheduler
// instance owns one collection's promotion timer and `stopped` flag (§9:
// "singletons owned by the collection object").
//
// The promotion loop is a periodic `tokio::time::interval` actor; dispatch
// is a single atomic CAS query per job handed out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::{Job, JobId, JobStatus, LogLevel, FOREVER};
use crate::domain::error::DomainError;
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobFilter, JobRepository, TimeProvider};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub collection: String,
    pub promotion_interval_ms: u64,
    /// Open question (§9) resolution: whether a stale-runId `jobProgress`
    /// call reports `false` (default) or `null`. See DESIGN.md.
    pub stale_progress_returns_null: bool,
    /// Open question (§9) resolution: whether `cancelRepeats` matches only
    /// same-`type` repeating jobs (default) or also across differing
    /// `data` payloads. See DESIGN.md.
    pub cancel_repeats_cross_payload: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            collection: "default".to_string(),
            promotion_interval_ms: 15_000,
            stale_progress_returns_null: false,
            cancel_repeats_cross_payload: false,
        }
    }
}

/// Input to `jobSave`. `id` is `None` for a brand-new job; `Some` saves over
/// an existing job's mutable scheduling fields (type/data stay immutable —
/// I3.1).
#[derive(Debug, Clone)]
pub struct JobSaveInput {
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
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobSaveOptions {
    pub cancel_repeats: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RerunOptions {
    pub repeats: Option<i64>,
    pub wait: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CancelOptions {
    pub antecedents: bool,
    pub dependents: bool,
}

impl CancelOptions {
    /// §4.2 default: `{antecedents:false, dependents:true}`.
    pub fn spec_default() -> Self {
        Self {
            antecedents: false,
            dependents: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RestartOptions {
    pub antecedents: bool,
    pub dependents: bool,
}

impl RestartOptions {
    /// §4.2 default: `{antecedents:true, dependents:false}`.
    pub fn spec_default() -> Self {
        Self {
            antecedents: true,
            dependents: false,
        }
    }
}

/// Result of a run-scoped mutation (`jobProgress`/`jobLog`/`jobDone`/
/// `jobFail`). The worker observes `Canceled` as the distinguished signal to
/// abort (§5); `ShuttingDown` is the `null` of §7; `Stale` is a plain failed
/// precondition (superseded runId, not itself a cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Ok,
    Stale,
    Canceled,
    ShuttingDown,
}

pub struct Scheduler {
    repo: Arc<dyn JobRepository>,
    time: Arc<dyn TimeProvider>,
    ids: Arc<dyn IdProvider>,
    config: SchedulerConfig,
    stopped: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        time: Arc<dyn TimeProvider>,
        ids: Arc<dyn IdProvider>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repo,
            time,
            ids,
            config,
            stopped: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn collection(&self) -> &str {
        &self.config.collection
    }

    /// Open question (§9) resolution exposed to the RPC layer, which decides
    /// how `ReportOutcome::Stale` serializes on the wire for `jobProgress`.
    pub fn stale_progress_returns_null(&self) -> bool {
        self.config.stale_progress_returns_null
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// `startJobs` — resumes the promotion loop.
    pub fn start_jobs(&self) -> bool {
        self.stopped.store(false, Ordering::SeqCst);
        info!(collection = %self.config.collection, "jobs started");
        true
    }

    /// `stopJobs` — halts promotion and dispatch; after `timeout` elapses,
    /// force-fails every job still `running`.
    pub async fn stop_jobs(&self, timeout: Option<Duration>) -> Result<bool> {
        self.stopped.store(true, Ordering::SeqCst);
        info!(collection = %self.config.collection, "jobs stopped");

        if let Some(timeout) = timeout {
            tokio::time::sleep(timeout).await;
            let now = self.time.now_millis();
            let changed = self
                .repo
                .force_fail_running(&self.config.collection, now, "Shutdown timeout exceeded")
                .await?;
            if !changed.is_empty() {
                warn!(
                    collection = %self.config.collection,
                    count = changed.len(),
                    "force-failed running jobs after shutdown timeout"
                );
            }
        }
        Ok(true)
    }

    /// Spawns the background promotion actor. Returns the `JoinHandle` so
    /// the caller (daemon composition root) can hold/abort it.
    pub fn spawn_promotion_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(
                this.config.promotion_interval_ms.max(1),
            ));
            loop {
                tick.tick().await;
                if this.is_stopped() {
                    continue;
                }
                let now = this.time.now_millis();
                match this.repo.promote_ready(&this.config.collection, now).await {
                    Ok(0) => {}
                    Ok(n) => debug!(collection = %this.config.collection, promoted = n, "promotion tick"),
                    Err(e) => warn!(collection = %this.config.collection, error = %e, "promotion tick failed"),
                }
            }
        })
    }

    // ---- Dispatch --------------------------------------------------

    /// `getWork` — never blocks; returns an empty vec while stopped.
    pub async fn get_work(&self, types: &[String], max_jobs: usize) -> Result<Vec<Job>> {
        if self.is_stopped() || max_jobs == 0 {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(max_jobs);
        while out.len() < max_jobs {
            let run_id = self.ids.generate_id();
            let now = self.time.now_millis();
            match self
                .repo
                .dispatch_one(&self.config.collection, types, &run_id, now)
                .await?
            {
                Some(job) => out.push(job),
                None => break,
            }
        }
        Ok(out)
    }

    // ---- jobSave / jobRerun -----------------------------------------

    pub async fn save(&self, input: JobSaveInput, options: JobSaveOptions) -> Result<JobId> {
        if let Some(existing_id) = &input.id {
            return self.save_existing(existing_id.clone(), input, options).await;
        }

        let now = self.time.now_millis();
        if self.would_cycle(&input.depends, None).await? {
            return Err(AppError::Validation(format!(
                "jobSave: depends on {:?} would close a dependency cycle",
                input.depends
            )));
        }

        if options.cancel_repeats && (input.repeats == FOREVER || input.repeats > 0) {
            self.cancel_repeating_siblings(&input.job_type, None).await?;
        }

        let id = self.ids.generate_id();
        let mut job = Job::new(
            id.clone(),
            self.config.collection.clone(),
            input.job_type,
            input.data,
            input.priority,
            input.after,
            input.depends,
            input.retries,
            input.retry_wait,
            input.repeats,
            input.repeat_wait,
            now,
        );
        if input.paused {
            job.status = JobStatus::Paused;
        }
        self.repo.insert(&job).await?;
        Ok(id)
    }

    async fn save_existing(
        &self,
        id: JobId,
        input: JobSaveInput,
        options: JobSaveOptions,
    ) -> Result<JobId> {
        let Some(mut job) = self.repo.find_one(&self.config.collection, &id).await? else {
            return Err(AppError::NotFound(format!("job {id} not found")));
        };
        let expected_status = job.status;
        let expected_run_id = job.run_id.clone();

        if self.would_cycle(&input.depends, Some(&id)).await? {
            return Err(AppError::Validation(format!(
                "jobSave: depends on {:?} would close a dependency cycle",
                input.depends
            )));
        }

        if options.cancel_repeats && (input.repeats == FOREVER || input.repeats > 0) {
            self.cancel_repeating_siblings(&input.job_type, Some(&id)).await?;
        }

        let now = self.time.now_millis();
        job.priority = input.priority;
        job.after = input.after;
        job.depends = input.depends;
        job.retries = input.retries;
        job.retry_wait = input.retry_wait;
        job.repeats = input.repeats;
        job.repeat_wait = input.repeat_wait;
        job.updated = now;

        match self
            .repo
            .compare_and_swap(&self.config.collection, expected_status, expected_run_id.as_deref(), &job)
            .await?
        {
            Some(_) => Ok(id),
            None => Err(AppError::Conflict(format!("job {id} status changed"))),
        }
    }

    /// Detects whether saving `depends` (for job `id`, or a not-yet-created
    /// job if `id` is `None`) would close a cycle: a reverse reachability
    /// check (§9) walking each dependency's own `depends` graph, rejecting
    /// if it ever reaches `id`.
    async fn would_cycle(&self, depends: &[JobId], id: Option<&JobId>) -> Result<bool> {
        let Some(id) = id else { return Ok(false) };
        let mut frontier: Vec<JobId> = depends.to_vec();
        let mut visited: HashSet<JobId> = HashSet::new();
        while let Some(next) = frontier.pop() {
            if &next == id {
                return Ok(true);
            }
            if !visited.insert(next.clone()) {
                continue;
            }
            if let Some(job) = self.repo.find_one(&self.config.collection, &next).await? {
                frontier.extend(job.depends);
            }
        }
        Ok(false)
    }

    async fn cancel_repeating_siblings(&self, job_type: &str, exclude_id: Option<&JobId>) -> Result<()> {
        let exclude = exclude_id.cloned().unwrap_or_default();
        let siblings = self
            .repo
            .find(
                &self.config.collection,
                JobFilter::RepeatingOfType {
                    job_type: job_type.to_string(),
                    exclude_id: exclude,
                },
            )
            .await?;
        for sibling in siblings {
            let _ = self.cancel_one(sibling.id).await;
        }
        Ok(())
    }

    /// `jobRerun` — a completed job spawns a fresh `waiting` sibling; the
    /// original is unchanged.
    pub async fn rerun(&self, id: &JobId, options: RerunOptions) -> Result<JobId> {
        let Some(job) = self.repo.find_one(&self.config.collection, id).await? else {
            return Err(AppError::NotFound(format!("job {id} not found")));
        };
        if job.status != JobStatus::Completed {
            return Err(AppError::InvalidState(format!(
                "jobRerun requires status=completed, found {}",
                job.status
            )));
        }

        let now = self.time.now_millis();
        let new_id = self.ids.generate_id();
        let mut sibling = job.clone();
        sibling.id = new_id.clone();
        sibling.status = JobStatus::Waiting;
        sibling.run_id = None;
        sibling.after = now + options.wait.unwrap_or(0);
        sibling.repeats = options.repeats.unwrap_or(0);
        sibling.repeated = 0;
        sibling.retried = 0;
        sibling.created_at = now;
        sibling.updated = now;
        sibling.progress = Default::default();
        sibling.log = Vec::new();
        sibling.result = None;
        sibling.depends = Vec::new();
        sibling.resolved = Vec::new();

        self.repo.insert(&sibling).await?;
        Ok(new_id)
    }

    // ---- getJob -------------------------------------------------------

    pub async fn get_job(&self, ids: &[JobId]) -> Result<Vec<Job>> {
        self.repo
            .find(&self.config.collection, JobFilter::ByIds(ids.to_vec()))
            .await
    }

    // ---- run-scoped mutations: progress / log / done / fail -----------

    /// Classifies a run-scoped call against the job's current state before
    /// any mutation is attempted.
    fn run_scoped_precondition(&self, job: &Job, run_id: &str) -> Option<ReportOutcome> {
        if self.is_stopped() {
            return Some(ReportOutcome::ShuttingDown);
        }
        if job.status == JobStatus::Cancelled {
            return Some(ReportOutcome::Canceled);
        }
        if job.status != JobStatus::Running || job.run_id.as_deref() != Some(run_id) {
            return Some(ReportOutcome::Stale);
        }
        None
    }

    pub async fn progress(
        &self,
        id: &JobId,
        run_id: &str,
        completed: i64,
        total: i64,
    ) -> Result<ReportOutcome> {
        let Some(mut job) = self.repo.find_one(&self.config.collection, id).await? else {
            return Err(AppError::NotFound(format!("job {id} not found")));
        };
        if let Some(outcome) = self.run_scoped_precondition(&job, run_id) {
            return Ok(outcome);
        }
        let expected_run_id = job.run_id.clone();
        let now = self.time.now_millis();
        job.set_progress(run_id, completed, total, now)
            .map_err(AppError::Domain)?;
        match self
            .repo
            .compare_and_swap(&self.config.collection, JobStatus::Running, expected_run_id.as_deref(), &job)
            .await?
        {
            Some(_) => Ok(ReportOutcome::Ok),
            None => Ok(ReportOutcome::Stale),
        }
    }

    pub async fn log(&self, id: &JobId, run_id: &str, message: &str, level: LogLevel) -> Result<ReportOutcome> {
        let Some(mut job) = self.repo.find_one(&self.config.collection, id).await? else {
            return Err(AppError::NotFound(format!("job {id} not found")));
        };
        if let Some(outcome) = self.run_scoped_precondition(&job, run_id) {
            return Ok(outcome);
        }
        let expected_run_id = job.run_id.clone();
        let now = self.time.now_millis();
        job.add_log(run_id, level, message, now).map_err(AppError::Domain)?;
        match self
            .repo
            .compare_and_swap(&self.config.collection, JobStatus::Running, expected_run_id.as_deref(), &job)
            .await?
        {
            Some(_) => Ok(ReportOutcome::Ok),
            None => Ok(ReportOutcome::Stale),
        }
    }

    pub async fn done(&self, id: &JobId, run_id: &str, result: serde_json::Value) -> Result<ReportOutcome> {
        let Some(mut job) = self.repo.find_one(&self.config.collection, id).await? else {
            return Err(AppError::NotFound(format!("job {id} not found")));
        };
        if let Some(outcome) = self.run_scoped_precondition(&job, run_id) {
            return Ok(outcome);
        }
        let now = self.time.now_millis();
        job.complete(run_id, result, now).map_err(AppError::Domain)?;
        match self
            .repo
            .compare_and_swap(&self.config.collection, JobStatus::Running, Some(run_id), &job)
            .await?
        {
            Some(_) => {
                self.cascade_on_complete(&job, now).await?;
                Ok(ReportOutcome::Ok)
            }
            None => Ok(ReportOutcome::Stale),
        }
    }

    pub async fn fail(&self, id: &JobId, run_id: &str, err: &str, fatal: bool) -> Result<ReportOutcome> {
        let Some(mut job) = self.repo.find_one(&self.config.collection, id).await? else {
            return Err(AppError::NotFound(format!("job {id} not found")));
        };
        if let Some(outcome) = self.run_scoped_precondition(&job, run_id) {
            return Ok(outcome);
        }
        let now = self.time.now_millis();
        job.fail(run_id, fatal, err, now).map_err(AppError::Domain)?;
        match self
            .repo
            .compare_and_swap(&self.config.collection, JobStatus::Running, Some(run_id), &job)
            .await?
        {
            Some(_) => Ok(ReportOutcome::Ok),
            None => Ok(ReportOutcome::Stale),
        }
    }

    /// Completion cascade (§4.2): resolve this job's id out of every
    /// dependent's `depends`, promoting any dependent whose `depends` is now
    /// empty and whose `after` has arrived; spawn a repeat sibling if due.
    async fn cascade_on_complete(&self, job: &Job, now: i64) -> Result<()> {
        let dependents = self
            .repo
            .find(&self.config.collection, JobFilter::DependsOn(job.id.clone()))
            .await?;
        for mut dependent in dependents {
            let expected_status = dependent.status;
            let expected_run_id = dependent.run_id.clone();
            dependent.resolve_dependency(&job.id, now);
            if dependent.status == JobStatus::Waiting && dependent.depends.is_empty() {
                // Event-driven promotion: don't wait for the next poll tick.
                let _ = dependent.promote(now);
            }
            let _ = self
                .repo
                .compare_and_swap(&self.config.collection, expected_status, expected_run_id.as_deref(), &dependent)
                .await?;
            // A duplicate cascade write (race with another completion) is a
            // no-op by I5/§5; a lost CAS here just means another writer
            // already applied the same idempotent change.
        }

        if job.repeats > 0 || job.repeats == FOREVER {
            let new_id = self.ids.generate_id();
            if let Some(sibling) = job.spawn_repeat(new_id, now) {
                self.repo.insert(&sibling).await?;
            }
        }
        Ok(())
    }

    // ---- pause / resume / cancel / restart / remove --------------------

    pub async fn pause(&self, ids: &[JobId]) -> Result<bool> {
        let mut any = false;
        for id in ids {
            any |= self.pause_one(id.clone()).await?;
        }
        Ok(any)
    }

    async fn pause_one(&self, id: JobId) -> Result<bool> {
        self.apply(&id, |job, now| job.pause(now)).await
    }

    pub async fn resume(&self, ids: &[JobId]) -> Result<bool> {
        let mut any = false;
        for id in ids {
            any |= self.apply(id, |job, now| job.resume(now)).await?;
        }
        Ok(any)
    }

    /// Generic single-job CAS-mutate helper shared by pause/resume/cancel/
    /// restart. Idempotent no-ops (already-paused pause, already-cancelled
    /// cancel) return `Ok(false)` rather than erroring — §8's laws
    /// `pause∘pause=pause`, `cancel∘cancel=cancel`.
    async fn apply<F>(&self, id: &JobId, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut Job, i64) -> std::result::Result<(), DomainError>,
    {
        let Some(mut job) = self.repo.find_one(&self.config.collection, id).await? else {
            return Err(AppError::NotFound(format!("job {id} not found")));
        };
        let expected_status = job.status;
        let expected_run_id = job.run_id.clone();
        let now = self.time.now_millis();
        if let Err(e) = mutate(&mut job, now) {
            return match e {
                DomainError::InvalidStateTransition { .. } | DomainError::PreconditionFailed(_) => Ok(false),
                other => Err(AppError::Domain(other)),
            };
        }
        match self
            .repo
            .compare_and_swap(&self.config.collection, expected_status, expected_run_id.as_deref(), &job)
            .await?
        {
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn cancel_one(&self, id: JobId) -> Result<bool> {
        self.apply(&id, |job, now| job.cancel(now)).await
    }

    async fn restart_one(&self, id: JobId) -> Result<bool> {
        self.apply(&id, |job, now| job.restart(now)).await
    }

    /// `jobCancel` — transitive closure over the `depends` graph in the
    /// requested direction(s), restricted to cancellable statuses (§4.2).
    pub async fn cancel(&self, ids: &[JobId], options: CancelOptions) -> Result<bool> {
        let affected = self.transitive_closure(ids, options.antecedents, options.dependents).await?;
        let mut any = false;
        for id in affected {
            any |= self.cancel_one(id).await?;
        }
        Ok(any)
    }

    /// `jobRestart` — symmetric with `jobCancel`, restricted to
    /// `{cancelled, failed}`.
    pub async fn restart(&self, ids: &[JobId], options: RestartOptions) -> Result<bool> {
        let affected = self.transitive_closure(ids, options.antecedents, options.dependents).await?;
        let mut any = false;
        for id in affected {
            any |= self.restart_one(id).await?;
        }
        Ok(any)
    }

    async fn transitive_closure(
        &self,
        roots: &[JobId],
        antecedents: bool,
        dependents: bool,
    ) -> Result<Vec<JobId>> {
        let mut visited: HashSet<JobId> = HashSet::new();
        let mut frontier: Vec<JobId> = roots.to_vec();
        let mut order: Vec<JobId> = Vec::new();

        while let Some(id) = frontier.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            order.push(id.clone());
            let Some(job) = self.repo.find_one(&self.config.collection, &id).await? else {
                continue;
            };
            if antecedents {
                frontier.extend(job.depends.iter().cloned());
            }
            if dependents {
                let deps = self
                    .repo
                    .find(&self.config.collection, JobFilter::DependsOn(id.clone()))
                    .await?;
                frontier.extend(deps.into_iter().map(|j| j.id));
            }
        }
        Ok(order)
    }

    /// `jobRemove` — legal only in a terminal state (§3.3).
    pub async fn remove(&self, ids: &[JobId]) -> Result<u64> {
        let mut removable = Vec::new();
        for id in ids {
            if let Some(job) = self.repo.find_one(&self.config.collection, id).await? {
                if job.status.is_terminal() {
                    removable.push(job.id);
                }
            }
        }
        if removable.is_empty() {
            return Ok(0);
        }
        self.repo.remove(&self.config.collection, &removable).await
    }
}
