// Job state machine integration tests — `Scheduler` driving `JobRepository`
// against a real (in-memory) SQLite store, exercising the transitions and
// invariants in SPEC_FULL.md §4.1/§8 end to end rather than against the
// domain's in-memory unit tests alone.

use std::sync::Arc;

use jobq_core::application::{JobSaveInput, JobSaveOptions, Scheduler, SchedulerConfig};
use jobq_core::domain::{priority, JobStatus, LogLevel};
use jobq_core::port::id_provider::UuidProvider;
use jobq_core::port::time_provider::{SystemTimeProvider, TimeProvider};
use jobq_core::port::JobRepository;
use jobq_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};

async fn scheduler() -> (Arc<Scheduler>, Arc<dyn JobRepository>) {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(pool));
    let sched = Arc::new(Scheduler::new(
        repo.clone(),
        Arc::new(SystemTimeProvider),
        Arc::new(UuidProvider),
        SchedulerConfig::default(),
    ));
    sched.start_jobs();
    (sched, repo)
}

fn save_input(job_type: &str) -> JobSaveInput {
    JobSaveInput {
        id: None,
        job_type: job_type.to_string(),
        data: serde_json::json!({}),
        priority: priority::NORMAL,
        after: 0,
        paused: false,
        depends: Vec::new(),
        retries: 0,
        retry_wait: 0,
        repeats: 0,
        repeat_wait: 0,
    }
}

#[tokio::test]
async fn save_then_get_job_round_trips() {
    let (sched, _repo) = scheduler().await;
    let id = sched.save(save_input("echo"), JobSaveOptions::default()).await.unwrap();
    let jobs = sched.get_job(&[id.clone()]).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, id);
    assert_eq!(jobs[0].job_type, "echo");
    assert_eq!(jobs[0].status, JobStatus::Ready);
}

#[tokio::test]
async fn full_success_lifecycle_via_get_work_and_done() {
    let (sched, _repo) = scheduler().await;
    let id = sched.save(save_input("echo"), JobSaveOptions::default()).await.unwrap();

    let jobs = sched.get_work(&["echo".to_string()], 1).await.unwrap();
    assert_eq!(jobs.len(), 1);
    let run_id = jobs[0].run_id.clone().unwrap();
    assert_eq!(jobs[0].status, JobStatus::Running);

    let outcome = sched.done(&id, &run_id, serde_json::json!({"ok": true})).await.unwrap();
    assert_eq!(outcome, jobq_core::application::ReportOutcome::Ok);

    let job = sched.get_job(&[id]).await.unwrap().into_iter().next().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(serde_json::json!({"ok": true})));
}

#[tokio::test]
async fn retry_budget_is_consumed_then_fails() {
    let (sched, repo) = scheduler().await;
    let mut input = save_input("flaky");
    input.retries = 2;
    input.retry_wait = 0;
    let id = sched.save(input, JobSaveOptions::default()).await.unwrap();

    // Attempt 1: retried, still has budget.
    let jobs = sched.get_work(&["flaky".to_string()], 1).await.unwrap();
    let run_id = jobs[0].run_id.clone().unwrap();
    sched.fail(&id, &run_id, "boom-1", false).await.unwrap();
    let job = sched.get_job(&[id.clone()]).await.unwrap().remove(0);
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.retries, 1);
    assert_eq!(job.retried, 1);

    // `fail` scheduled `after = now + retry_wait(0)`; drive the same
    // promotion sweep the background timer would run, deterministically.
    repo.promote_ready("default", SystemTimeProvider.now_millis() + 1).await.unwrap();

    // Attempt 2: retry budget exhausted.
    let jobs = sched.get_work(&["flaky".to_string()], 1).await.unwrap();
    let run_id = jobs[0].run_id.clone().unwrap();
    sched.fail(&id, &run_id, "boom-2", false).await.unwrap();
    let job = sched.get_job(&[id.clone()]).await.unwrap().remove(0);
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.retries, 0);
    assert_eq!(job.retried, 2);

    repo.promote_ready("default", SystemTimeProvider.now_millis() + 1).await.unwrap();

    // Attempt 3: no budget left, fatal transition to failed.
    let jobs = sched.get_work(&["flaky".to_string()], 1).await.unwrap();
    let run_id = jobs[0].run_id.clone().unwrap();
    sched.fail(&id, &run_id, "boom-3", false).await.unwrap();
    let job = sched.get_job(&[id]).await.unwrap().remove(0);
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn progress_zero_total_yields_zero_percent() {
    let (sched, _repo) = scheduler().await;
    let id = sched.save(save_input("echo"), JobSaveOptions::default()).await.unwrap();
    let jobs = sched.get_work(&["echo".to_string()], 1).await.unwrap();
    let run_id = jobs[0].run_id.clone().unwrap();

    sched.progress(&id, &run_id, 0, 0).await.unwrap();
    let job = sched.get_job(&[id]).await.unwrap().remove(0);
    assert_eq!(job.progress.percent(), 0.0);
}

#[tokio::test]
async fn log_is_append_only_across_transitions() {
    let (sched, _repo) = scheduler().await;
    let id = sched.save(save_input("echo"), JobSaveOptions::default()).await.unwrap();
    let jobs = sched.get_work(&["echo".to_string()], 1).await.unwrap();
    let run_id = jobs[0].run_id.clone().unwrap();

    sched.log(&id, &run_id, "step 1", LogLevel::Info).await.unwrap();
    sched.log(&id, &run_id, "step 2", LogLevel::Info).await.unwrap();
    let before = sched.get_job(&[id.clone()]).await.unwrap().remove(0).log;

    sched.done(&id, &run_id, serde_json::json!({})).await.unwrap();
    let after = sched.get_job(&[id]).await.unwrap().remove(0).log;

    assert!(after.len() > before.len());
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.message, b.message);
    }
}

#[tokio::test]
async fn pause_then_pause_is_idempotent() {
    let (sched, _repo) = scheduler().await;
    let id = sched.save(save_input("echo"), JobSaveOptions::default()).await.unwrap();
    assert!(sched.pause(&[id.clone()]).await.unwrap());
    assert!(!sched.pause(&[id]).await.unwrap(), "second pause is a no-op, not an error");
}

#[tokio::test]
async fn cancel_then_cancel_is_idempotent() {
    let (sched, _repo) = scheduler().await;
    let id = sched.save(save_input("echo"), JobSaveOptions::default()).await.unwrap();
    assert!(sched.cancel(&[id.clone()], Default::default()).await.unwrap());
    assert!(!sched.cancel(&[id], Default::default()).await.unwrap());
}

#[tokio::test]
async fn remove_rejects_non_terminal_jobs() {
    let (sched, _repo) = scheduler().await;
    let id = sched.save(save_input("echo"), JobSaveOptions::default()).await.unwrap();
    let removed = sched.remove(&[id.clone()]).await.unwrap();
    assert_eq!(removed, 0, "a waiting/ready job is not terminal and cannot be removed");

    sched.cancel(&[id.clone()], Default::default()).await.unwrap();
    let removed = sched.remove(&[id]).await.unwrap();
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn forever_repeat_spawns_sibling_with_same_sentinel() {
    let (sched, _repo) = scheduler().await;
    let mut input = save_input("nightly");
    input.repeats = jobq_core::domain::FOREVER;
    input.repeat_wait = 0;
    let id = sched.save(input, JobSaveOptions::default()).await.unwrap();

    let jobs = sched.get_work(&["nightly".to_string()], 1).await.unwrap();
    let run_id = jobs[0].run_id.clone().unwrap();
    sched.done(&id, &run_id, serde_json::json!({})).await.unwrap();

    // The sibling is `waiting` until the next promotion sweep; assert on the
    // original's own conserved sentinel instead of racing the sweep.
    let original = sched.get_job(&[id]).await.unwrap().remove(0);
    assert_eq!(original.status, JobStatus::Completed);
    assert_eq!(original.repeats, jobq_core::domain::FOREVER, "forever never decrements");
}
