// Application Layer - Use Cases and Business Logic

pub mod gate;
pub mod job_queue;
pub mod maintenance;
pub mod recovery;
pub mod scheduler;

// Re-exports
pub use gate::{PermissionGate, Rule};
pub use job_queue::{shutdown_channel, JobQueue, JobQueueConfig, ShutdownLevel, ShutdownSender, ShutdownToken, WorkSource};
pub use maintenance::MaintenanceScheduler;
pub use recovery::RecoveryService;
pub use scheduler::{
    CancelOptions, JobSaveInput, JobSaveOptions, ReportOutcome, RerunOptions, RestartOptions, Scheduler,
    SchedulerConfig,
};
