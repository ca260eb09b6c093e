// Worker-side JobQueue (§4.4) — lives on a worker host, not the daemon.
// Pulls work through a `WorkSource` into a bounded buffer, dispatches
// buffered jobs into worker invocations up to `concurrency`, and drains per
// the three shutdown levels.
//
// The pull loop races a `ShutdownToken` against the next unit of work via
// `tokio::select!`. The buffer/dispatch split is required by §4.4's
// "buffered-but-not-started" distinction that `normal` shutdown depends on.

pub mod shutdown;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::scheduler::ReportOutcome;
use crate::domain::{Job, JobId, LogLevel};
use crate::error::Result;

pub use shutdown::{shutdown_channel, ShutdownLevel, ShutdownSender, ShutdownToken};

/// Abstracts the RPC client so the pull loop can be exercised with an
/// in-process fake in tests. The production implementation lives in `sdk`.
#[async_trait::async_trait]
pub trait WorkSource: Send + Sync {
    async fn get_work(&self, types: &[String], max_jobs: usize) -> Result<Vec<Job>>;
    async fn progress(&self, id: &JobId, run_id: &str, completed: i64, total: i64) -> Result<ReportOutcome>;
    async fn log(&self, id: &JobId, run_id: &str, level: LogLevel, message: &str) -> Result<ReportOutcome>;
    async fn done(&self, id: &JobId, run_id: &str, result: serde_json::Value) -> Result<ReportOutcome>;
    async fn fail(&self, id: &JobId, run_id: &str, message: &str, fatal: bool) -> Result<ReportOutcome>;
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub types: Vec<String>,
    pub concurrency: usize,
    pub cargo: usize,
    pub poll_interval: Duration,
    pub prefetch: usize,
}

impl JobQueueConfig {
    pub fn new(types: Vec<String>) -> Self {
        Self {
            types,
            concurrency: 1,
            cargo: 1,
            poll_interval: Duration::from_millis(5_000),
            prefetch: 0,
        }
    }

    /// `concurrency * cargo + prefetch` (§4.4): the buffer holds up to this
    /// many jobs across buffered-but-not-started plus in-flight.
    pub fn capacity(&self) -> usize {
        self.concurrency.max(1) * self.cargo.max(1) + self.prefetch
    }

    fn cargo(&self) -> usize {
        self.cargo.max(1)
    }

    fn concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

/// One job handed to the worker callback. The callback MUST eventually call
/// exactly one of `done`/`fail` — the JobQueue tracks in-flight count by
/// these completion signals, not by polling (§4.4).
pub struct JobHandle {
    job: Job,
    run_id: String,
    source: Arc<dyn WorkSource>,
}

impl JobHandle {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// `false` means the job was canceled, or the server is shutting down —
    /// the caller's code MUST stop and drop the job (§5).
    pub async fn progress(&self, completed: i64, total: i64) -> Result<bool> {
        let outcome = self
            .source
            .progress(&self.job.id, &self.run_id, completed, total)
            .await?;
        Ok(outcome == ReportOutcome::Ok)
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<bool> {
        let message = message.into();
        let outcome = self.source.log(&self.job.id, &self.run_id, level, &message).await?;
        Ok(outcome == ReportOutcome::Ok)
    }

    pub async fn done(&self, result: serde_json::Value) -> Result<()> {
        self.source.done(&self.job.id, &self.run_id, result).await?;
        Ok(())
    }

    pub async fn fail(&self, message: impl Into<String>, fatal: bool) -> Result<()> {
        self.source.fail(&self.job.id, &self.run_id, &message.into(), fatal).await?;
        Ok(())
    }
}

pub type WorkerFn = Arc<dyn Fn(Vec<JobHandle>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Jobs currently executing inside a spawned worker invocation, keyed by id,
/// so a `hard` shutdown can synthesize a `jobFail` for each without reaching
/// into the spawned tasks that own them.
type ActiveJobs = Arc<Mutex<HashMap<JobId, String>>>;

pub struct JobQueue {
    config: JobQueueConfig,
    source: Arc<dyn WorkSource>,
    worker: WorkerFn,
    /// Jobs pulled from `getWork` but not yet handed to an invocation —
    /// the "buffered-but-not-started" set `normal` shutdown fails and `soft`
    /// lets drain naturally.
    buffer: Arc<Mutex<VecDeque<Job>>>,
    running: Arc<AtomicUsize>,
    active: ActiveJobs,
    shutdown: ShutdownToken,
}

impl JobQueue {
    pub fn new(
        config: JobQueueConfig,
        source: Arc<dyn WorkSource>,
        worker: WorkerFn,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            config,
            source,
            worker,
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            running: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        }
    }

    /// Count of spawned, currently-executing worker invocations (bounded by
    /// `concurrency`), not buffered jobs.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    async fn buffer_len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Runs the pull loop until shutdown drains the queue (`soft`/`normal`)
    /// or `hard` forces it closed.
    pub async fn run(mut self) {
        info!(
            types = ?self.config.types,
            concurrency = self.config.concurrency,
            cargo = self.config.cargo,
            "job queue pull loop starting"
        );

        loop {
            let level = self.shutdown.level();

            if level == ShutdownLevel::Hard {
                self.fail_buffered("Worker shut down (hard)").await;
                self.fail_all_running("Worker shut down (hard)").await;
                break;
            }

            if level == ShutdownLevel::Normal {
                // Buffered-but-not-started jobs are failed; already-running
                // invocations are left to finish naturally (§4.4).
                self.fail_buffered("Worker shut down (normal)").await;
            } else {
                self.dispatch_from_buffer().await;
            }

            if level != ShutdownLevel::Running {
                if self.running() == 0 && self.buffer_len().await == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            let capacity = self.config.capacity();
            let occupancy = self.buffer_len().await + self.running() * self.config.cargo();
            if occupancy >= capacity {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {},
                    _ = self.shutdown.wait() => {},
                }
                continue;
            }

            let shortfall = capacity - occupancy;
            match self.source.get_work(&self.config.types, shortfall).await {
                Ok(jobs) if jobs.is_empty() => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {},
                        _ = self.shutdown.wait() => {},
                    }
                }
                Ok(jobs) => {
                    debug!(count = jobs.len(), "pulled jobs into buffer");
                    let mut buffer = self.buffer.lock().await;
                    buffer.extend(jobs);
                }
                Err(e) => {
                    warn!(error = %e, "getWork failed, backing off");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        info!("job queue pull loop stopped");
    }

    /// Pop up to `cargo` buffered jobs per free concurrency slot and spawn a
    /// worker invocation for each group.
    async fn dispatch_from_buffer(&self) {
        let cargo = self.config.cargo();
        loop {
            if self.running() >= self.config.concurrency() {
                break;
            }
            let batch = {
                let mut buffer = self.buffer.lock().await;
                if buffer.is_empty() {
                    break;
                }
                let take = cargo.min(buffer.len());
                buffer.drain(..take).collect::<Vec<_>>()
            };
            self.spawn_invocation(batch).await;
        }
    }

    async fn spawn_invocation(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        let mut handles = Vec::with_capacity(jobs.len());
        {
            let mut active = self.active.lock().await;
            for job in jobs {
                let run_id = job.run_id.clone().unwrap_or_default();
                active.insert(job.id.clone(), run_id.clone());
                handles.push(JobHandle {
                    run_id,
                    job,
                    source: Arc::clone(&self.source),
                });
            }
        }

        self.running.fetch_add(1, Ordering::SeqCst);
        let worker = Arc::clone(&self.worker);
        let running = Arc::clone(&self.running);
        let active = Arc::clone(&self.active);
        let ids: Vec<JobId> = handles.iter().map(|h| h.job.id.clone()).collect();

        tokio::spawn(async move {
            let fut = (worker)(handles);
            if let Err(join_err) = tokio::spawn(fut).await {
                // A panicking callback cannot take down the host process;
                // its panic surfaces here as a worker failure (§5.1).
                warn!(jobs = ?ids, error = %join_err, "worker callback panicked");
            }
            let mut active = active.lock().await;
            for id in &ids {
                active.remove(id);
            }
            running.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// `normal`/`hard` shutdown: fail every job still sitting in the buffer
    /// (never handed to a worker invocation) and drain the buffer.
    async fn fail_buffered(&self, message: &str) {
        let drained: Vec<Job> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };
        for job in drained {
            let Some(run_id) = job.run_id.as_deref() else { continue };
            if let Err(e) = self.source.fail(&job.id, run_id, message, true).await {
                warn!(job_id = %job.id, error = %e, "failed to report buffered-shutdown failure");
            }
        }
    }

    /// `hard` shutdown only: fail every job currently inside a spawned
    /// invocation without waiting for that invocation to return.
    async fn fail_all_running(&self, message: &str) {
        let active = self.active.lock().await;
        for (id, run_id) in active.iter() {
            if let Err(e) = self.source.fail(id, run_id, message, true).await {
                warn!(job_id = %id, error = %e, "failed to report hard-shutdown failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use tokio::sync::Notify;

    struct FakeSource {
        queue: Mutex<VecDeque<Job>>,
        done_count: StdAtomicUsize,
        fail_count: StdAtomicUsize,
    }

    #[async_trait::async_trait]
    impl WorkSource for FakeSource {
        async fn get_work(&self, _types: &[String], max_jobs: usize) -> Result<Vec<Job>> {
            let mut q = self.queue.lock().await;
            let n = max_jobs.min(q.len());
            Ok(q.drain(..n).collect())
        }
        async fn progress(&self, _id: &JobId, _run_id: &str, _completed: i64, _total: i64) -> Result<ReportOutcome> {
            Ok(ReportOutcome::Ok)
        }
        async fn log(&self, _id: &JobId, _run_id: &str, _level: LogLevel, _message: &str) -> Result<ReportOutcome> {
            Ok(ReportOutcome::Ok)
        }
        async fn done(&self, _id: &JobId, _run_id: &str, _result: serde_json::Value) -> Result<ReportOutcome> {
            self.done_count.fetch_add(1, Ordering::SeqCst);
            Ok(ReportOutcome::Ok)
        }
        async fn fail(&self, _id: &JobId, _run_id: &str, _message: &str, _fatal: bool) -> Result<ReportOutcome> {
            self.fail_count.fetch_add(1, Ordering::SeqCst);
            Ok(ReportOutcome::Ok)
        }
    }

    fn job(id: &str) -> Job {
        let mut j = Job::new(id, "default", "t", serde_json::json!({}), 0, 0, Vec::new(), 0, 0, 0, 0, 0);
        j.status = crate::domain::JobStatus::Running;
        j.run_id = Some(format!("run-{id}"));
        j
    }

    #[tokio::test]
    async fn drains_buffered_jobs_through_a_bounded_number_of_invocations() {
        let source = Arc::new(FakeSource {
            queue: Mutex::new(VecDeque::from(vec![job("a"), job("b"), job("c")])),
            done_count: StdAtomicUsize::new(0),
            fail_count: StdAtomicUsize::new(0),
        });
        let notify = Arc::new(Notify::new());
        let notify2 = Arc::clone(&notify);
        let completed = Arc::new(StdAtomicUsize::new(0));
        let completed2 = Arc::clone(&completed);

        let worker: WorkerFn = Arc::new(move |handles: Vec<JobHandle>| {
            let completed = Arc::clone(&completed2);
            let notify = Arc::clone(&notify2);
            Box::pin(async move {
                for h in handles {
                    h.done(serde_json::json!({})).await.unwrap();
                    completed.fetch_add(1, Ordering::SeqCst);
                }
                notify.notify_one();
            })
        });

        let mut config = JobQueueConfig::new(vec!["t".to_string()]);
        config.concurrency = 2;
        config.poll_interval = Duration::from_millis(10);
        let (sender, token) = shutdown_channel();

        let queue = JobQueue::new(config, source.clone(), worker, token);
        let handle = tokio::spawn(queue.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        sender.shutdown(ShutdownLevel::Soft);
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

        assert_eq!(source.done_count.load(Ordering::SeqCst), 3);
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn normal_shutdown_fails_buffered_jobs_but_lets_running_finish() {
        let source = Arc::new(FakeSource {
            queue: Mutex::new(VecDeque::from(vec![job("a"), job("b")])),
            done_count: StdAtomicUsize::new(0),
            fail_count: StdAtomicUsize::new(0),
        });
        let release = Arc::new(Notify::new());
        let release2 = Arc::clone(&release);
        let started = Arc::new(Notify::new());
        let started2 = Arc::clone(&started);

        let worker: WorkerFn = Arc::new(move |handles: Vec<JobHandle>| {
            let release = Arc::clone(&release2);
            let started = Arc::clone(&started2);
            Box::pin(async move {
                started.notify_one();
                release.notified().await;
                for h in handles {
                    h.done(serde_json::json!({})).await.unwrap();
                }
            })
        });

        let mut config = JobQueueConfig::new(vec!["t".to_string()]);
        config.concurrency = 1;
        config.cargo = 1;
        config.poll_interval = Duration::from_millis(10);
        let (sender, token) = shutdown_channel();

        let queue = JobQueue::new(config, Arc::clone(&source) as Arc<dyn WorkSource>, worker, token);
        let handle = tokio::spawn(queue.run());

        // Wait until the first job is picked up and its invocation is
        // blocked inside the worker callback; the second job is still
        // sitting in the buffer at that point (concurrency=1).
        started.notified().await;
        sender.shutdown(ShutdownLevel::Normal);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(source.fail_count.load(Ordering::SeqCst), 1, "buffered job should be failed");
        assert_eq!(source.done_count.load(Ordering::SeqCst), 0, "running job not yet released");

        release.notify_one();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert_eq!(source.done_count.load(Ordering::SeqCst), 1, "running job finishes naturally");
    }

    #[tokio::test]
    async fn hard_shutdown_fails_buffered_and_running_without_waiting() {
        let source = Arc::new(FakeSource {
            queue: Mutex::new(VecDeque::from(vec![job("a"), job("b")])),
            done_count: StdAtomicUsize::new(0),
            fail_count: StdAtomicUsize::new(0),
        });
        let release = Arc::new(Notify::new());
        let release2 = Arc::clone(&release);
        let started = Arc::new(Notify::new());
        let started2 = Arc::clone(&started);

        let worker: WorkerFn = Arc::new(move |handles: Vec<JobHandle>| {
            let release = Arc::clone(&release2);
            let started = Arc::clone(&started2);
            Box::pin(async move {
                started.notify_one();
                release.notified().await;
                for h in handles {
                    let _ = h.done(serde_json::json!({})).await;
                }
            })
        });

        let mut config = JobQueueConfig::new(vec!["t".to_string()]);
        config.concurrency = 1;
        config.cargo = 1;
        config.poll_interval = Duration::from_millis(10);
        let (sender, token) = shutdown_channel();

        let queue = JobQueue::new(config, Arc::clone(&source) as Arc<dyn WorkSource>, worker, token);
        let handle = tokio::spawn(queue.run());

        started.notified().await;
        sender.shutdown(ShutdownLevel::Hard);
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

        // Both the buffered second job and the still-blocked first
        // invocation were reported failed; `run` returned without waiting
        // for the blocked callback.
        assert_eq!(source.fail_count.load(Ordering::SeqCst), 2);

        release.notify_one();
    }
}
