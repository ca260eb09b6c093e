// Retention / maintenance port (§4.2.1) — ambient housekeeping, not a spec
// invariant. Off by default: a `finished_job_retention_days` of 0 disables
// the sweep entirely so it can never delete a job before it is terminal.
use crate::error::Result;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct MaintenanceStats {
    pub db_size_mb: f64,
    pub db_size_bytes: i64,
    pub job_count: i64,
    pub finished_job_count: i64,
}

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Retention period for terminal jobs (days). 0 disables the sweep.
    pub finished_job_retention_days: i64,
    /// Maximum DB size before forcing VACUUM (MB).
    pub max_db_size_mb: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            finished_job_retention_days: 0,
            max_db_size_mb: 1000.0,
        }
    }
}

#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Run VACUUM to reclaim space. Returns space reclaimed in MB.
    async fn vacuum(&self) -> Result<f64>;

    /// Delete terminal jobs (completed/failed/cancelled) older than
    /// `retention_days`. Returns the number of jobs deleted.
    async fn gc_finished_jobs(&self, retention_days: i64) -> Result<i64>;

    async fn get_stats(&self) -> Result<MaintenanceStats>;

    /// Orchestrates a full sweep: skip entirely if retention is disabled.
    async fn run_full_maintenance(&self, config: &MaintenanceConfig) -> Result<MaintenanceStats> {
        if config.finished_job_retention_days <= 0 {
            return self.get_stats().await;
        }

        let stats_before = self.get_stats().await?;
        let deleted_jobs = self.gc_finished_jobs(config.finished_job_retention_days).await?;

        let reclaimed_mb = if stats_before.db_size_mb > config.max_db_size_mb {
            self.vacuum().await?
        } else {
            0.0
        };

        let stats_after = self.get_stats().await?;

        tracing::info!(
            deleted_jobs = deleted_jobs,
            reclaimed_mb = reclaimed_mb,
            db_size_mb = stats_after.db_size_mb,
            "retention sweep completed"
        );

        Ok(stats_after)
    }
}
