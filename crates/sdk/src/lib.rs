//! jobq SDK — Rust worker client library.
//!
//! Provides a JSON-RPC client for the jobq daemon that also implements
//! `core::application::WorkSource`, so it can drive a `JobQueue` directly.
//!
//! # Example
//!
//! ```no_run
//! use jobq_sdk::{JobqClient, SaveJob};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = JobqClient::connect("http://127.0.0.1:9527", "worker-1").await?;
//!
//!     let id = client
//!         .job_save(SaveJob::new("INDEX_FILE", json!({"path": "src/main.rs"})))
//!         .await?;
//!
//!     println!("job saved: {id}");
//!
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::JobqClient;
pub use error::{Result, SdkError};
pub use types::{
    GetJobRequest, GetWorkRequest, JobCancelRequest, JobDoneRequest, JobFailRequest,
    JobLogRequest, JobPauseRequest, JobProgressRequest, JobRemoveRequest, JobRerunRequest,
    JobResumeRequest, JobRestartRequest, JobSaveRequest, SaveJob, StartJobsRequest,
    StopJobsRequest,
};
