// SQLite Record Store Adapter (§4.5) — implements the `JobRepository` port.
//
// `dispatch_one` is a single atomic `UPDATE ... WHERE id = (SELECT ...
// RETURNING` subquery. `compare_and_swap` is a conditional `UPDATE ... WHERE
// status = ? [AND run_id = ?]` read back via `rows_affected`. Bulk promotion
// appends to the `log` column with `json_insert(log, '$[#]', json(?))`, the
// natural SQLite counterpart to a document store's atomic array-push.

use async_trait::async_trait;
use jobq_core::domain::{
    Job, JobId, JobStatus, LogEntry, LogLevel, Progress,
};
use jobq_core::error::{AppError, Result};
use jobq_core::port::JobFilter;
use sqlx::{Row, SqlitePool};

fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => AppError::Database(format!(
            "{} ({})",
            db_err.message(),
            db_err.code().unwrap_or_default()
        )),
        sqlx::Error::RowNotFound => AppError::Database("row not found".to_string()),
        other => AppError::Database(other.to_string()),
    }
}

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Waiting => "waiting",
        JobStatus::Paused => "paused",
        JobStatus::Ready => "ready",
        JobStatus::Running => "running",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
        JobStatus::Completed => "completed",
    }
}

fn parse_status(s: &str) -> Result<JobStatus> {
    Ok(match s {
        "waiting" => JobStatus::Waiting,
        "paused" => JobStatus::Paused,
        "ready" => JobStatus::Ready,
        "running" => JobStatus::Running,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        "completed" => JobStatus::Completed,
        other => return Err(AppError::Database(format!("unknown job status: {other}"))),
    })
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ")
}

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
        let depends: String = row.try_get("depends").map_err(map_sqlx_error)?;
        let resolved: String = row.try_get("resolved").map_err(map_sqlx_error)?;
        let progress: String = row.try_get("progress").map_err(map_sqlx_error)?;
        let log: String = row.try_get("log").map_err(map_sqlx_error)?;
        let result: Option<String> = row.try_get("result").map_err(map_sqlx_error)?;
        let data: String = row.try_get("data").map_err(map_sqlx_error)?;
        let status: String = row.try_get("status").map_err(map_sqlx_error)?;

        Ok(Job {
            id: row.try_get("id").map_err(map_sqlx_error)?,
            collection: row.try_get("collection").map_err(map_sqlx_error)?,
            job_type: row.try_get("job_type").map_err(map_sqlx_error)?,
            data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
            status: parse_status(&status)?,
            run_id: row.try_get("run_id").map_err(map_sqlx_error)?,
            priority: row.try_get("priority").map_err(map_sqlx_error)?,
            after: row.try_get("after_ts").map_err(map_sqlx_error)?,
            created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
            updated: row.try_get("updated").map_err(map_sqlx_error)?,
            depends: serde_json::from_str::<Vec<JobId>>(&depends).unwrap_or_default(),
            resolved: serde_json::from_str::<Vec<JobId>>(&resolved).unwrap_or_default(),
            retries: row.try_get("retries").map_err(map_sqlx_error)?,
            retried: row.try_get("retried").map_err(map_sqlx_error)?,
            retry_wait: row.try_get("retry_wait").map_err(map_sqlx_error)?,
            repeats: row.try_get("repeats").map_err(map_sqlx_error)?,
            repeated: row.try_get("repeated").map_err(map_sqlx_error)?,
            repeat_wait: row.try_get("repeat_wait").map_err(map_sqlx_error)?,
            progress: serde_json::from_str::<Progress>(&progress).unwrap_or_default(),
            log: serde_json::from_str::<Vec<LogEntry>>(&log).unwrap_or_default(),
            result: result.and_then(|r| serde_json::from_str(&r).ok()),
        })
    }

    /// Full-row UPDATE used wherever the caller already holds the complete
    /// mutated `Job` in memory (compare_and_swap, force-fail sweep).
    async fn write_full_row(&self, job: &Job) -> Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE jobs SET
                job_type = ?, data = ?, status = ?, run_id = ?,
                priority = ?, after_ts = ?, updated = ?,
                depends = ?, resolved = ?,
                retries = ?, retried = ?, retry_wait = ?,
                repeats = ?, repeated = ?, repeat_wait = ?,
                progress = ?, log = ?, result = ?
            WHERE id = ? AND collection = ?
            "#,
        )
        .bind(&job.job_type)
        .bind(job.data.to_string())
        .bind(status_str(job.status))
        .bind(&job.run_id)
        .bind(job.priority)
        .bind(job.after)
        .bind(job.updated)
        .bind(serde_json::to_string(&job.depends).unwrap())
        .bind(serde_json::to_string(&job.resolved).unwrap())
        .bind(job.retries)
        .bind(job.retried)
        .bind(job.retry_wait)
        .bind(job.repeats)
        .bind(job.repeated)
        .bind(job.repeat_wait)
        .bind(serde_json::to_string(&job.progress).unwrap())
        .bind(serde_json::to_string(&job.log).unwrap())
        .bind(job.result.as_ref().map(|r| r.to_string()))
        .bind(&job.id)
        .bind(&job.collection)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl jobq_core::port::JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, collection, job_type, data, status, run_id,
                priority, after_ts, created_at, updated,
                depends, resolved,
                retries, retried, retry_wait,
                repeats, repeated, repeat_wait,
                progress, log, result
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.collection)
        .bind(&job.job_type)
        .bind(job.data.to_string())
        .bind(status_str(job.status))
        .bind(&job.run_id)
        .bind(job.priority)
        .bind(job.after)
        .bind(job.created_at)
        .bind(job.updated)
        .bind(serde_json::to_string(&job.depends).unwrap())
        .bind(serde_json::to_string(&job.resolved).unwrap())
        .bind(job.retries)
        .bind(job.retried)
        .bind(job.retry_wait)
        .bind(job.repeats)
        .bind(job.repeated)
        .bind(job.repeat_wait)
        .bind(serde_json::to_string(&job.progress).unwrap())
        .bind(serde_json::to_string(&job.log).unwrap())
        .bind(job.result.as_ref().map(|r| r.to_string()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_one(&self, collection: &str, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn find(&self, collection: &str, filter: JobFilter) -> Result<Vec<Job>> {
        match filter {
            JobFilter::All => {
                let rows = sqlx::query("SELECT * FROM jobs WHERE collection = ?")
                    .bind(collection)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;
                rows.iter().map(Self::row_to_job).collect()
            }
            JobFilter::ByStatus(statuses) => {
                if statuses.is_empty() {
                    return Ok(Vec::new());
                }
                let sql = format!(
                    "SELECT * FROM jobs WHERE collection = ? AND status IN ({})",
                    placeholders(statuses.len())
                );
                let mut q = sqlx::query(&sql).bind(collection);
                for s in &statuses {
                    q = q.bind(status_str(*s));
                }
                let rows = q.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;
                rows.iter().map(Self::row_to_job).collect()
            }
            JobFilter::ByType(types) => {
                if types.is_empty() {
                    return Ok(Vec::new());
                }
                let sql = format!(
                    "SELECT * FROM jobs WHERE collection = ? AND job_type IN ({})",
                    placeholders(types.len())
                );
                let mut q = sqlx::query(&sql).bind(collection);
                for t in &types {
                    q = q.bind(t);
                }
                let rows = q.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;
                rows.iter().map(Self::row_to_job).collect()
            }
            JobFilter::ByIds(ids) => {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let sql = format!(
                    "SELECT * FROM jobs WHERE collection = ? AND id IN ({})",
                    placeholders(ids.len())
                );
                let mut q = sqlx::query(&sql).bind(collection);
                for id in &ids {
                    q = q.bind(id);
                }
                let rows = q.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;
                rows.iter().map(Self::row_to_job).collect()
            }
            JobFilter::DependsOn(dep) => {
                // `depends` is a JSON array column; membership is checked in
                // Rust rather than via a SQL substring match, which would
                // risk false positives between ids that are prefixes of one
                // another.
                let rows = sqlx::query("SELECT * FROM jobs WHERE collection = ?")
                    .bind(collection)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;
                let jobs: Vec<Job> = rows.iter().map(Self::row_to_job).collect::<Result<_>>()?;
                Ok(jobs.into_iter().filter(|j| j.depends.contains(&dep)).collect())
            }
            JobFilter::RepeatingOfType { job_type, exclude_id } => {
                let rows = sqlx::query(
                    "SELECT * FROM jobs WHERE collection = ? AND job_type = ? AND id != ? AND repeats = ?",
                )
                .bind(collection)
                .bind(&job_type)
                .bind(&exclude_id)
                .bind(jobq_core::domain::FOREVER)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
                let jobs: Vec<Job> = rows.iter().map(Self::row_to_job).collect::<Result<_>>()?;
                Ok(jobs.into_iter().filter(|j| j.status.is_cancellable()).collect())
            }
        }
    }

    async fn promote_ready(&self, collection: &str, now: i64) -> Result<u64> {
        let entry = LogEntry {
            time: now,
            run_id: None,
            level: LogLevel::Info,
            message: "Promoted to ready".to_string(),
        };
        let entry_json = serde_json::to_string(&entry).unwrap();
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'ready',
                updated = ?,
                log = json_insert(log, '$[#]', json(?))
            WHERE collection = ? AND status = 'waiting' AND depends = '[]' AND after_ts <= ?
            "#,
        )
        .bind(now)
        .bind(entry_json)
        .bind(collection)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(res.rows_affected())
    }

    async fn dispatch_one(
        &self,
        collection: &str,
        types: &[String],
        run_id: &str,
        now: i64,
    ) -> Result<Option<Job>> {
        if types.is_empty() {
            return Ok(None);
        }
        let entry = LogEntry {
            time: now,
            run_id: Some(run_id.to_string()),
            level: LogLevel::Info,
            message: "Running".to_string(),
        };
        let entry_json = serde_json::to_string(&entry).unwrap();

        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'running',
                run_id = ?,
                updated = ?,
                log = json_insert(log, '$[#]', json(?))
            WHERE id = (
                SELECT id FROM jobs
                WHERE collection = ? AND status = 'ready' AND job_type IN ({})
                ORDER BY priority ASC, after_ts ASC, updated ASC
                LIMIT 1
            )
            RETURNING *
            "#,
            placeholders(types.len())
        );

        let mut q = sqlx::query(&sql).bind(run_id).bind(now).bind(entry_json).bind(collection);
        for t in types {
            q = q.bind(t);
        }
        let row = q.fetch_optional(&self.pool).await.map_err(map_sqlx_error)?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        expected_status: JobStatus,
        expected_run_id: Option<&str>,
        new_job: &Job,
    ) -> Result<Option<Job>> {
        let sql = if expected_run_id.is_some() {
            r#"
            UPDATE jobs SET
                job_type = ?, data = ?, status = ?, run_id = ?,
                priority = ?, after_ts = ?, updated = ?,
                depends = ?, resolved = ?,
                retries = ?, retried = ?, retry_wait = ?,
                repeats = ?, repeated = ?, repeat_wait = ?,
                progress = ?, log = ?, result = ?
            WHERE id = ? AND collection = ? AND status = ? AND run_id = ?
            "#
        } else {
            r#"
            UPDATE jobs SET
                job_type = ?, data = ?, status = ?, run_id = ?,
                priority = ?, after_ts = ?, updated = ?,
                depends = ?, resolved = ?,
                retries = ?, retried = ?, retry_wait = ?,
                repeats = ?, repeated = ?, repeat_wait = ?,
                progress = ?, log = ?, result = ?
            WHERE id = ? AND collection = ? AND status = ? AND run_id IS NULL
            "#
        };

        let mut q = sqlx::query(sql)
            .bind(&new_job.job_type)
            .bind(new_job.data.to_string())
            .bind(status_str(new_job.status))
            .bind(&new_job.run_id)
            .bind(new_job.priority)
            .bind(new_job.after)
            .bind(new_job.updated)
            .bind(serde_json::to_string(&new_job.depends).unwrap())
            .bind(serde_json::to_string(&new_job.resolved).unwrap())
            .bind(new_job.retries)
            .bind(new_job.retried)
            .bind(new_job.retry_wait)
            .bind(new_job.repeats)
            .bind(new_job.repeated)
            .bind(new_job.repeat_wait)
            .bind(serde_json::to_string(&new_job.progress).unwrap())
            .bind(serde_json::to_string(&new_job.log).unwrap())
            .bind(new_job.result.as_ref().map(|r| r.to_string()))
            .bind(&new_job.id)
            .bind(collection)
            .bind(status_str(expected_status));
        if let Some(rid) = expected_run_id {
            q = q.bind(rid);
        }

        let res = q.execute(&self.pool).await.map_err(map_sqlx_error)?;
        if res.rows_affected() == 1 {
            Ok(Some(new_job.clone()))
        } else {
            Ok(None)
        }
    }

    async fn remove(&self, collection: &str, ids: &[JobId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM jobs WHERE collection = ? AND id IN ({})",
            placeholders(ids.len())
        );
        let mut q = sqlx::query(&sql).bind(collection);
        for id in ids {
            q = q.bind(id);
        }
        let res = q.execute(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(res.rows_affected())
    }

    async fn force_fail_running(&self, collection: &str, now: i64, message: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE collection = ? AND status = 'running'")
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut changed = Vec::new();
        for row in &rows {
            let mut job = Self::row_to_job(row)?;
            job.force_fail(message, now);
            if self.write_full_row(&job).await? == 1 {
                changed.push(job);
            }
        }
        Ok(changed)
    }

    async fn gc_terminal_before(&self, collection: &str, cutoff: i64) -> Result<u64> {
        let res = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE collection = ?
              AND status IN ('completed', 'failed', 'cancelled')
              AND updated < ?
            "#,
        )
        .bind(collection)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(res.rows_affected())
    }

    async fn count_by_status(&self, collection: &str, status: JobStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE collection = ? AND status = ?",
        )
        .bind(collection)
        .bind(status_str(status))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use jobq_core::domain::Job;
    use jobq_core::port::JobRepository;

    async fn setup() -> SqliteJobRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobRepository::new(pool)
    }

    #[tokio::test]
    async fn insert_and_find_one_round_trips() {
        let repo = setup().await;
        let job = Job::new(
            "j1",
            "default",
            "noop",
            serde_json::json!({"x": 1}),
            0,
            0,
            Vec::new(),
            0,
            0,
            0,
            0,
            1_000,
        );
        repo.insert(&job).await.unwrap();

        let found = repo.find_one("default", &"j1".to_string()).await.unwrap().unwrap();
        assert_eq!(found.id, "j1");
        assert_eq!(found.status, JobStatus::Ready);
        assert_eq!(found.data, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn promote_ready_moves_eligible_waiting_jobs() {
        let repo = setup().await;
        let mut job = Job::new(
            "j1", "default", "t", serde_json::json!({}), 0, 5_000, Vec::new(), 0, 0, 0, 0, 1_000,
        );
        job.status = JobStatus::Waiting;
        repo.insert(&job).await.unwrap();

        let promoted = repo.promote_ready("default", 4_000).await.unwrap();
        assert_eq!(promoted, 0);

        let promoted = repo.promote_ready("default", 5_000).await.unwrap();
        assert_eq!(promoted, 1);

        let found = repo.find_one("default", &"j1".to_string()).await.unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Ready);
        assert_eq!(found.log.len(), 1);
        assert_eq!(found.log[0].message, "Promoted to ready");
    }

    #[tokio::test]
    async fn dispatch_one_is_atomic_across_racing_callers() {
        let repo = setup().await;
        let job = Job::new(
            "j1", "default", "t", serde_json::json!({}), 0, 0, Vec::new(), 0, 0, 0, 0, 1_000,
        );
        repo.insert(&job).await.unwrap();

        let won = repo
            .dispatch_one("default", &["t".to_string()], "run-a", 2_000)
            .await
            .unwrap();
        assert!(won.is_some());

        let lost = repo
            .dispatch_one("default", &["t".to_string()], "run-b", 2_001)
            .await
            .unwrap();
        assert!(lost.is_none());
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_precondition() {
        let repo = setup().await;
        let job = Job::new(
            "j1", "default", "t", serde_json::json!({}), 0, 0, Vec::new(), 0, 0, 0, 0, 1_000,
        );
        repo.insert(&job).await.unwrap();

        let mut mutated = job.clone();
        mutated.dispatch("run-1", 2_000).unwrap();
        let ok = repo
            .compare_and_swap("default", JobStatus::Ready, None, &mutated)
            .await
            .unwrap();
        assert!(ok.is_some());

        // Second attempt from the same stale precondition must fail.
        let stale_attempt = repo
            .compare_and_swap("default", JobStatus::Ready, None, &mutated)
            .await
            .unwrap();
        assert!(stale_attempt.is_none());
    }

    #[tokio::test]
    async fn gc_terminal_before_only_deletes_terminal_jobs_past_cutoff() {
        let repo = setup().await;
        let mut old_completed = Job::new(
            "old", "default", "t", serde_json::json!({}), 0, 0, Vec::new(), 0, 0, 0, 0, 1_000,
        );
        old_completed.dispatch("run-1", 1_000).unwrap();
        old_completed.complete("run-1", serde_json::json!({}), 1_500).unwrap();
        repo.insert(&old_completed).await.unwrap();

        let running = Job::new(
            "running", "default", "t", serde_json::json!({}), 0, 0, Vec::new(), 0, 0, 0, 0, 1_000,
        );
        repo.insert(&running).await.unwrap();

        let deleted = repo.gc_terminal_before("default", 2_000).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.find_one("default", &"old".to_string()).await.unwrap().is_none());
        assert!(repo.find_one("default", &"running".to_string()).await.unwrap().is_some());
    }
}
