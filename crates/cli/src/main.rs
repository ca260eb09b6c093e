//! jobq CLI - command-line client for the jobq job queue daemon.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use jobq_sdk::{JobqClient, SaveJob};
use serde::Serialize;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9527";
const DEFAULT_CALLER_ID: &str = "jobq-cli";

#[derive(Parser)]
#[command(name = "jobq")]
#[command(about = "jobq job queue CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "JOBQ_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Identity presented to the Permission Gate
    #[arg(long, env = "JOBQ_CALLER_ID", default_value = DEFAULT_CALLER_ID)]
    caller_id: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Save (create or update) a job
    Save {
        /// Job type
        #[arg(short = 't', long)]
        job_type: String,

        /// Payload as a JSON string
        #[arg(long, default_value = "{}")]
        data: String,

        /// Existing job id to update instead of creating a new one
        #[arg(long)]
        id: Option<String>,

        /// Priority (lower runs sooner; see `core::domain::job::priority`)
        #[arg(short, long, default_value = "0")]
        priority: i32,

        /// Don't dispatch until this many milliseconds since epoch
        #[arg(long, default_value = "0")]
        after: i64,

        /// Create in a paused state
        #[arg(long)]
        paused: bool,

        /// Comma-separated ids this job depends on
        #[arg(long, value_delimiter = ',')]
        depends: Vec<String>,

        /// Retry attempts on failure (0 disables)
        #[arg(long, default_value = "0")]
        retries: i64,

        #[arg(long, default_value = "0")]
        retry_wait: i64,

        /// Repeat count after completion (0 disables, use a large number for "forever")
        #[arg(long, default_value = "0")]
        repeats: i64,

        #[arg(long, default_value = "0")]
        repeat_wait: i64,
    },

    /// Fetch one or more jobs by id
    Get {
        /// Job ids
        ids: Vec<String>,
    },

    /// Pause jobs
    Pause { ids: Vec<String> },

    /// Resume paused jobs
    Resume { ids: Vec<String> },

    /// Cancel jobs
    Cancel {
        ids: Vec<String>,
        #[arg(long)]
        antecedents: Option<bool>,
        #[arg(long)]
        dependents: Option<bool>,
    },

    /// Restart failed or cancelled jobs
    Restart {
        ids: Vec<String>,
        #[arg(long)]
        antecedents: Option<bool>,
        #[arg(long)]
        dependents: Option<bool>,
    },

    /// Remove jobs outright
    Remove { ids: Vec<String> },

    /// Re-enqueue a completed job as a fresh run
    Rerun {
        id: String,
        #[arg(long)]
        repeats: Option<i64>,
        #[arg(long)]
        wait: Option<i64>,
    },

    /// Start (resume) dispatching for the collection
    Start,

    /// Stop dispatching, draining running jobs
    Stop {
        /// Milliseconds to wait before force-failing still-running jobs
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[derive(Serialize, Tabled)]
struct JobRow {
    id: String,
    #[tabled(rename = "type")]
    job_type: String,
    status: String,
    priority: i32,
    retried: i64,
    repeated: i64,
}

impl From<&jobq_core::domain::Job> for JobRow {
    fn from(job: &jobq_core::domain::Job) -> Self {
        Self {
            id: job.id.clone(),
            job_type: job.job_type.clone(),
            status: job.status.to_string(),
            priority: job.priority,
            retried: job.retried,
            repeated: job.repeated,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = JobqClient::connect(&cli.rpc_url, &cli.caller_id)
        .await
        .context("failed to connect to daemon")?;

    match cli.command {
        Commands::Save {
            job_type,
            data,
            id,
            priority,
            after,
            paused,
            depends,
            retries,
            retry_wait,
            repeats,
            repeat_wait,
        } => {
            let data_json: serde_json::Value = serde_json::from_str(&data).context("invalid JSON payload")?;
            let job = SaveJob {
                id,
                job_type,
                data: data_json,
                priority,
                after,
                paused,
                depends,
                retries,
                retry_wait,
                repeats,
                repeat_wait,
                cancel_repeats: true,
            };
            let saved_id = client.job_save(job).await?;
            println!("{} {}", "job saved:".green().bold(), saved_id);
        }

        Commands::Get { ids } => {
            let jobs = client.get_job(&ids).await?;
            if jobs.is_empty() {
                println!("{}", "no jobs found".yellow());
            } else {
                let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Pause { ids } => {
            let ok = client.job_pause(&ids).await?;
            print_bool_result("pause", ok);
        }

        Commands::Resume { ids } => {
            let ok = client.job_resume(&ids).await?;
            print_bool_result("resume", ok);
        }

        Commands::Cancel { ids, antecedents, dependents } => {
            let ok = client.job_cancel(&ids, antecedents, dependents).await?;
            print_bool_result("cancel", ok);
        }

        Commands::Restart { ids, antecedents, dependents } => {
            let ok = client.job_restart(&ids, antecedents, dependents).await?;
            print_bool_result("restart", ok);
        }

        Commands::Remove { ids } => {
            let ok = client.job_remove(&ids).await?;
            print_bool_result("remove", ok);
        }

        Commands::Rerun { id, repeats, wait } => {
            let new_id = client.job_rerun(&id, repeats, wait).await?;
            println!("{} {}", "rerun scheduled:".green().bold(), new_id);
        }

        Commands::Start => {
            let ok = client.start_jobs().await?;
            print_bool_result("start", ok);
        }

        Commands::Stop { timeout_ms } => {
            let timeout = timeout_ms.map(std::time::Duration::from_millis);
            let ok = client.stop_jobs(timeout).await?;
            print_bool_result("stop", ok);
        }
    }

    Ok(())
}

fn print_bool_result(action: &str, ok: bool) {
    if ok {
        println!("{} {}", "ok:".green().bold(), action);
    } else {
        println!("{} {}", "no-op:".yellow().bold(), action);
    }
}
