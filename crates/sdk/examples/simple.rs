//! Simple SDK example.
//!
//! 1. Start the daemon: `cargo run --package jobq-daemon`
//! 2. Run this example: `cargo run --example simple --package jobq-sdk`

use jobq_sdk::{JobqClient, SaveJob};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("jobq SDK - simple example\n");

    println!("1. Connecting to daemon...");
    let client = JobqClient::connect("http://127.0.0.1:9527", "example-client").await?;
    println!("   connected\n");

    println!("2. Saving a job...");
    let job_id = client
        .job_save(SaveJob::new(
            "INDEX_FILE",
            json!({"path": "examples/simple.rs", "mode": "full_index"}),
        ))
        .await?;
    println!("   job saved: {job_id}\n");

    println!("3. Fetching job...");
    let jobs = client.get_job(&[job_id.clone()]).await?;
    if let Some(job) = jobs.first() {
        println!("   status: {}", job.status);
    }

    println!("\n4. Cancelling job...");
    let cancelled = client.job_cancel(&[job_id], None, None).await?;
    println!("   cancelled: {cancelled}");

    println!("\nexample completed.");
    Ok(())
}
