// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use job::{
    dispatch_order_key, priority, CollectionId as JobCollectionId, Job, JobId, JobStatus,
    LogEntry, LogLevel, Progress, RunId, FOREVER,
};
pub use queue::{CollectionConfig, CollectionId};
