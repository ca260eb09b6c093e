// Domain Error Types

use crate::domain::job::JobStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("invalid transition from {from} to {to}")]
    InvalidStateTransition { from: JobStatus, to: JobStatus },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("cyclic dependency introduced by job {0}")]
    CyclicDependency(String),

    #[error("invalid priority: {0}")]
    InvalidPriority(i32),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
