// SQLite Maintenance Implementation (retention sweep + VACUUM, §4.2.1)
use async_trait::async_trait;
use jobq_core::error::{AppError, Result};
use jobq_core::port::{Maintenance, MaintenanceStats, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

pub struct SqliteMaintenance {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self { pool, time_provider }
    }

    async fn get_db_size_bytes(&self) -> Result<i64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("failed to get page count: {e}")))?;

        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("failed to get page size: {e}")))?;

        Ok(page_count * page_size)
    }
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        info!("running VACUUM");
        let before = self.get_db_size_bytes().await?;

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("VACUUM failed: {e}")))?;

        let after = self.get_db_size_bytes().await?;
        let reclaimed_mb = ((before - after).max(0) as f64) / (1024.0 * 1024.0);

        info!(reclaimed_mb, "VACUUM completed");
        Ok(reclaimed_mb)
    }

    async fn gc_finished_jobs(&self, retention_days: i64) -> Result<i64> {
        let now = self.time_provider.now_millis();
        let cutoff = now - retention_days * 24 * 60 * 60 * 1000;

        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND updated < ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("job GC failed: {e}")))?;

        let deleted = result.rows_affected() as i64;
        info!(deleted_jobs = deleted, cutoff, "finished job GC completed");
        Ok(deleted)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        let db_size_bytes = self.get_db_size_bytes().await?;
        let db_size_mb = db_size_bytes as f64 / (1024.0 * 1024.0);

        let job_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("failed to count jobs: {e}")))?;

        let finished_job_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('completed', 'failed', 'cancelled')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("failed to count finished jobs: {e}")))?;

        Ok(MaintenanceStats {
            db_size_mb,
            db_size_bytes,
            job_count,
            finished_job_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, SqliteJobRepository};
    use jobq_core::domain::Job;
    use jobq_core::port::time_provider::SystemTimeProvider;
    use jobq_core::port::JobRepository;

    #[tokio::test]
    async fn test_maintenance_stats() {
        let pool = create_pool(":memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let time_provider = Arc::new(SystemTimeProvider);
        let maintenance = SqliteMaintenance::new(pool, time_provider);

        let stats = maintenance.get_stats().await.unwrap();
        assert!(stats.db_size_mb > 0.0);
        assert_eq!(stats.job_count, 0);
        assert_eq!(stats.finished_job_count, 0);
    }

    #[tokio::test]
    async fn test_vacuum() {
        let pool = create_pool(":memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let time_provider = Arc::new(SystemTimeProvider);
        let maintenance = SqliteMaintenance::new(pool, time_provider);

        let reclaimed = maintenance.vacuum().await.unwrap();
        assert!(reclaimed >= 0.0);
    }

    #[tokio::test]
    async fn test_gc_finished_jobs_respects_retention_window() {
        let pool = create_pool(":memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let time_provider = Arc::new(SystemTimeProvider);
        let job_repo = SqliteJobRepository::new(pool.clone());
        let maintenance = SqliteMaintenance::new(pool, time_provider.clone());

        let now_ms = time_provider.now_millis();
        let ten_days_ago = now_ms - (10 * 24 * 60 * 60 * 1000);

        let mut job = Job::new(
            "old-job",
            "default",
            "test",
            serde_json::json!({}),
            0,
            0,
            Vec::new(),
            0,
            0,
            0,
            0,
            ten_days_ago,
        );
        job.dispatch("run-1", ten_days_ago).unwrap();
        job.complete("run-1", serde_json::json!({}), ten_days_ago).unwrap();

        job_repo.insert(&job).await.unwrap();

        let deleted = maintenance.gc_finished_jobs(7).await.unwrap();
        assert_eq!(deleted, 1);

        let found = job_repo.find_one("default", &job.id).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_gc_finished_jobs_spares_recent_jobs() {
        let pool = create_pool(":memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let time_provider = Arc::new(SystemTimeProvider);
        let job_repo = SqliteJobRepository::new(pool.clone());
        let maintenance = SqliteMaintenance::new(pool, time_provider.clone());

        let now_ms = time_provider.now_millis();
        let mut job = Job::new(
            "recent-job",
            "default",
            "test",
            serde_json::json!({}),
            0,
            0,
            Vec::new(),
            0,
            0,
            0,
            0,
            now_ms,
        );
        job.dispatch("run-1", now_ms).unwrap();
        job.complete("run-1", serde_json::json!({}), now_ms).unwrap();
        job_repo.insert(&job).await.unwrap();

        let deleted = maintenance.gc_finished_jobs(7).await.unwrap();
        assert_eq!(deleted, 0);
    }
}
