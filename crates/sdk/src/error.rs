//! SDK error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SdkError>;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("RPC error ({code}): {message}")]
    Rpc { code: i32, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("other error: {0}")]
    Other(String),
}

impl From<jsonrpsee::core::ClientError> for SdkError {
    fn from(e: jsonrpsee::core::ClientError) -> Self {
        match e {
            jsonrpsee::core::ClientError::Call(call_err) => SdkError::Rpc {
                code: call_err.code(),
                message: call_err.message().to_string(),
            },
            jsonrpsee::core::ClientError::Transport(e) => {
                SdkError::Transport(format!("transport error: {e}"))
            }
            jsonrpsee::core::ClientError::RestartNeeded(_) => {
                SdkError::Connection("connection restart needed".to_string())
            }
            jsonrpsee::core::ClientError::ParseError(e) => {
                SdkError::Other(format!("parse error: {e}"))
            }
            _ => SdkError::Other(e.to_string()),
        }
    }
}

/// Run-scoped calls (`jobProgress`/`jobLog`/`jobDone`/`jobFail`) fold into a
/// plain `AppError` at the `WorkSource` boundary; the RPC error code carries
/// enough information for `core`'s callers, nothing `core`-specific to map.
impl From<SdkError> for jobq_core::error::AppError {
    fn from(e: SdkError) -> Self {
        jobq_core::error::AppError::Internal(e.to_string())
    }
}
