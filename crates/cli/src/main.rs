//! Shipyard CLI entry point.
//!
//! This binary is the composition root for the entire system:
//!
//! 1. **Parse configuration**: command-line flags, environment variables and
//!    an optional JSON [`pipeline::EngineConfig`] file, validated up front.
//! 2. **Wire observability**: `tracing-subscriber` plus an OpenTelemetry OTLP
//!    exporter when an endpoint is configured.
//! 3. **Construct infrastructure**: HTTP agents, the audit log, episodic
//!    memory, the host monitor, and the progress hub, injected into the
//!    [`nodes::PipelineExecutor`].
//! 4. **Run one request** through [`nodes::WorkflowService`], streaming
//!    progress to stderr and printing the final outcome as JSON on stdout.
//!    The exit status is non-zero unless the workflow succeeded.

mod args;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use agents::{HttpAgent, HttpReachabilityProbe};
use anyhow::{Context, Result};
use clap::Parser;
use journal::{InMemoryEpisodicMemory, JsonlAuditLog, TracingAuditLog};
use nodes::{
    AgentGateway, AgentRegistry, MemInfoMonitor, NodeContext, PipelineExecutor, ProgressHub,
    WorkflowService,
};
use pipeline::{AuditLog, ProgressEvent, SessionRateLimiter};

use crate::args::Args;

/// Per-probe timeout when checking a deployed URL.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let telemetry = telemetry::init(args.json_logs, args.otlp_endpoint.as_deref())?;

    let result = run(&args).await;
    telemetry.shutdown();
    result
}

async fn run(args: &Args) -> Result<ExitCode> {
    let config = args.engine_config()?;
    let session_id = args.session_id()?;

    let timeout = Duration::from_secs(args.agent_timeout_secs);
    let agent = |url: &str| -> Result<Arc<HttpAgent>> {
        Ok(Arc::new(HttpAgent::new(url, timeout)?))
    };
    let mut registry = AgentRegistry::new(
        agent(&args.planner_url)?,
        agent(&args.builder_url)?,
        agent(&args.tester_url)?,
    );
    if let Some(url) = &args.deployer_url {
        registry = registry.with_deployer(agent(url)?);
    }

    let audit_file = match &args.audit_log {
        Some(path) => Some(Arc::new(JsonlAuditLog::open(path).await?)),
        None => None,
    };
    let audit: Arc<dyn AuditLog> = match &audit_file {
        Some(file) => file.clone(),
        None => Arc::new(TracingAuditLog::new()),
    };

    let hub = ProgressHub::default();
    let gateway = AgentGateway::new(
        registry,
        Arc::new(SessionRateLimiter::new(config.session_call_budget)),
        config.backoff(),
    )
    .with_max_retry_after(config.max_retry_after());
    let ctx = NodeContext::new(
        gateway,
        audit,
        Arc::new(InMemoryEpisodicMemory::new()),
        Arc::new(MemInfoMonitor::new(config.min_available_memory_kib)),
        Arc::new(HttpReachabilityProbe::new(PROBE_TIMEOUT)?),
        config,
    );
    let executor = Arc::new(PipelineExecutor::new(Arc::new(ctx), Arc::new(hub.clone())));
    let service = WorkflowService::new(executor);

    let mut progress = hub.subscribe_session(session_id.clone());
    let printer = (!args.quiet).then(|| {
        tokio::spawn(async move {
            while let Some(event) = progress.recv().await {
                print_progress(&event);
            }
        })
    });

    let session_id = service.start(&args.request, Some(session_id))?;
    tracing::info!(session_id = %session_id, "Request submitted");

    let finished = tokio::select! {
        outcome = service.wait(&session_id) => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(session_id = %session_id, "Interrupted; cancelling workflow");
            service.cancel(&session_id);
            service.wait(&session_id).await
        }
    };
    let outcome = finished.context("workflow result is missing")?;

    if let Some(printer) = printer {
        printer.abort();
    }
    if let Some(file) = &audit_file {
        if let Err(e) = file.flush().await {
            tracing::warn!(error = %e, "Audit log was not fully written");
        }
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_progress(event: &ProgressEvent) {
    eprintln!(
        "[{:>3}] {:<9} {:<9} {}",
        event.sequence,
        event.step,
        event.status.to_string(),
        event.message
    );
}
