//! RPC Error Types
//!
//! Maps `AppError` to JSON-RPC error codes (§7). `ShutdownInProgress` is
//! deliberately NOT mapped here: it never reaches `to_rpc_error` because the
//! run-scoped handlers fold it into `ReportOutcome::ShuttingDown` and return
//! a plain `null` result instead of an error object, preserving the
//! `false`/`null` distinction a worker must tell apart.

use jobq_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;

pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const THROTTLED: i32 = 4003;
    pub const NOT_AUTHORISED: i32 = 4003 + 1;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Validation(msg) => ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg, None::<()>),
        AppError::NotFound(msg) => ErrorObjectOwned::owned(code::NOT_FOUND, msg, None::<()>),
        AppError::Conflict(msg) => ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>),
        AppError::InvalidState(msg) => ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>),
        AppError::Database(msg) => ErrorObjectOwned::owned(code::DB_ERROR, msg, None::<()>),
        AppError::NotAuthorised(msg) => ErrorObjectOwned::owned(code::NOT_AUTHORISED, msg, None::<()>),
        AppError::Internal(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
        AppError::Domain(e) => ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>),
        AppError::Io(e) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, e.to_string(), None::<()>),
        AppError::Serialization(e) => ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>),
        AppError::Config(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
        AppError::ShutdownInProgress => {
            ErrorObjectOwned::owned(code::INTERNAL_ERROR, "shutdown in progress", None::<()>)
        }
    }
}
