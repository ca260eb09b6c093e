// Startup recovery sweep (§6.3) — on daemon start, any job left `running`
// belongs to a worker process that cannot possibly still hold it (the
// previous daemon instance is gone, and a worker only ever talks to the
// daemon it was dispatched by). There is no PID to probe and no process to
// kill: workers are remote over RPC, not local subprocesses. So recovery is
// just "force-fail everything running, then let retries do their job".
//
// grounded on: `RecoveryService::recover_orphaned_jobs` (teacher), stripped
// of the PID-alive-check / kill-and-requeue branch, which has no counterpart
// once job execution moves off-box.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::Job;
use crate::error::Result;
use crate::port::{JobRepository, TimeProvider};

pub struct RecoveryService {
    repo: Arc<dyn JobRepository>,
    time: Arc<dyn TimeProvider>,
}

impl RecoveryService {
    pub fn new(repo: Arc<dyn JobRepository>, time: Arc<dyn TimeProvider>) -> Self {
        Self { repo, time }
    }

    /// Runs once at daemon startup, before the promotion loop and RPC server
    /// come up. Returns the jobs that were force-failed.
    pub async fn recover(&self, collection: &str) -> Result<Vec<Job>> {
        let now = self.time.now_millis();
        info!(collection, "running startup recovery sweep");

        let recovered = self
            .repo
            .force_fail_running(collection, now, "Daemon restarted while job was running")
            .await?;

        if recovered.is_empty() {
            info!(collection, "no orphaned running jobs found");
        } else {
            warn!(
                collection,
                count = recovered.len(),
                "force-failed jobs that were running at daemon shutdown"
            );
        }
        Ok(recovered)
    }
}
