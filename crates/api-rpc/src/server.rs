//! JSON-RPC Server
//!
//! Implements the JSON-RPC 2.0 server over TCP (localhost-only). Per §6.1,
//! "every method is qualified with the collection name as a prefix to allow
//! multiple collections per server" — each collection gets its own
//! `RpcHandler` (its own `Scheduler`/`PermissionGate`/rate limiter) and its
//! methods are registered as `"<collection>.<method>"`.

use crate::handler::RpcHandler;
use crate::rate_limiter::RateLimiter;
use crate::types::{
    GetJobRequest, GetWorkRequest, JobCancelRequest, JobDoneRequest, JobFailRequest,
    JobLogRequest, JobPauseRequest, JobProgressRequest, JobRemoveRequest, JobRerunRequest,
    JobResumeRequest, JobRestartRequest, JobSaveRequest, StartJobsRequest, StopJobsRequest,
};
use jobq_core::application::{PermissionGate, Scheduler};
use jobq_core::port::TimeProvider;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9527;

pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
    pub rate_limit_burst: u32,
    pub rate_limit_rate: u32,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
            rate_limit_burst: 200,
            rate_limit_rate: 100,
        }
    }
}

/// One collection's worth of wiring: its own promotion/dispatch actor and
/// its own gate (tenants may authorise callers differently per collection).
pub struct CollectionEndpoint {
    pub scheduler: Arc<Scheduler>,
    pub gate: Arc<PermissionGate>,
}

pub struct RpcServer {
    config: RpcServerConfig,
    time: Arc<dyn TimeProvider>,
    collections: Vec<CollectionEndpoint>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, time: Arc<dyn TimeProvider>, collections: Vec<CollectionEndpoint>) -> Self {
        Self { config, time, collections }
    }

    /// Start the JSON-RPC server. Binds to localhost only — no external
    /// access; remote access is expected to go through an operator-managed
    /// tunnel or reverse proxy, not this listener directly.
    pub async fn start(self) -> Result<ServerHandle, String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(host = %self.config.host, port = %self.config.port, "starting JSON-RPC server");

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("failed to build server on {addr}: {e}"))?;

        let mut module = RpcModule::new(());

        for endpoint in self.collections {
            let collection = endpoint.scheduler.collection().to_string();
            let rate_limiter = Arc::new(RateLimiter::new(
                self.config.rate_limit_burst,
                self.config.rate_limit_rate,
            ));
            let handler = Arc::new(RpcHandler::new(
                endpoint.scheduler,
                endpoint.gate,
                rate_limiter,
                self.time.clone(),
            ));
            register_collection_methods(&mut module, &collection, handler)?;
        }

        info!("JSON-RPC server started successfully");

        let handle = server.start(module);
        Ok(handle)
    }
}

fn register_collection_methods(
    module: &mut RpcModule<()>,
    collection: &str,
    handler: Arc<RpcHandler>,
) -> Result<(), String> {
    macro_rules! register {
        ($wire_name:literal, $method:ident, $req:ty) => {{
            let name: &'static str = Box::leak(format!("{collection}.{}", $wire_name).into_boxed_str());
            let handler = handler.clone();
            module
                .register_async_method(name, move |params, _, _| {
                    let handler = handler.clone();
                    async move {
                        let req: $req = params.parse()?;
                        handler.$method(req).await
                    }
                })
                .map_err(|e| e.to_string())?;
        }};
    }

    register!("startJobs", start_jobs, StartJobsRequest);
    register!("stopJobs", stop_jobs, StopJobsRequest);
    register!("jobSave", job_save, JobSaveRequest);
    register!("jobRerun", job_rerun, JobRerunRequest);
    register!("getJob", get_job, GetJobRequest);
    register!("getWork", get_work, GetWorkRequest);
    register!("jobProgress", job_progress, JobProgressRequest);
    register!("jobLog", job_log, JobLogRequest);
    register!("jobDone", job_done, JobDoneRequest);
    register!("jobFail", job_fail, JobFailRequest);
    register!("jobPause", job_pause, JobPauseRequest);
    register!("jobResume", job_resume, JobResumeRequest);
    register!("jobCancel", job_cancel, JobCancelRequest);
    register!("jobRestart", job_restart, JobRestartRequest);
    register!("jobRemove", job_remove, JobRemoveRequest);

    Ok(())
}
