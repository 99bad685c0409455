//! Publishes validated artefacts.
//!
//! A missing deployer, or a deployer that declines, yields a *skipped*
//! deployment, which still counts as success. A deployer that fails is an
//! error. When a URL comes back it is polled until it answers or the poll
//! timeout elapses; an unanswered URL is recorded as unverified rather than
//! failing the workflow.

use std::time::{Duration, Instant};

use pipeline::{
    AgentRole, ArtifactLocation, DeploymentResult, DeploymentUrl, ErrorKind, Importance,
    ReachabilityProbe, StateError, StateUpdate, Step, WorkflowState,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{call_failed, resources_exhausted};
use crate::NodeContext;

const STEP: Step = Step::Deploy;

/// What a deployer may answer with.
#[derive(Debug, Deserialize)]
struct DeployPayload {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    skipped: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Deploys the validated artefact, or records why it was skipped.
pub async fn run(state: WorkflowState, ctx: &NodeContext) -> Result<WorkflowState, StateError> {
    let started = Instant::now();
    if let Err(e) = ctx.resources.check() {
        return resources_exhausted(state, STEP, &e);
    }
    let Some(artifacts) = state.generated_artifacts().cloned() else {
        return state.record_error(
            STEP,
            ErrorKind::Unrecoverable,
            "deploy started without build artefacts",
        );
    };
    let location = artifacts.artifact_location.clone();

    if !ctx.gateway.has_agent(AgentRole::Deployer) {
        return skipped(state, ctx, location, "no deployment target configured", started);
    }

    let input = json!({
        "request": state.request_text(),
        "artifact_location": artifacts.artifact_location,
        "files": artifacts.files,
    });
    let payload = match ctx
        .gateway
        .call(AgentRole::Deployer, state.session_id(), input, None)
        .await
    {
        Ok(payload) => payload,
        Err(e) => return call_failed(state, STEP, &e),
    };

    let payload = match parse_payload(payload) {
        Ok(p) => p,
        Err(reason) => {
            return state.record_error(
                STEP,
                ErrorKind::ExternalCall,
                format!("deployer returned an unusable payload: {reason}"),
            )
        }
    };
    if payload.skipped {
        let reason = payload
            .reason
            .unwrap_or_else(|| "deployer declined to deploy".to_string());
        return skipped(state, ctx, location, &reason, started);
    }
    let Some(url) = payload.url.and_then(DeploymentUrl::new) else {
        return state.record_error(
            STEP,
            ErrorKind::ExternalCall,
            "deployer reported success without a URL",
        );
    };

    let verified = wait_until_reachable(
        ctx.reachability.as_ref(),
        &url,
        ctx.config.deploy_poll_timeout(),
        ctx.config.deploy_poll_interval(),
    )
    .await;
    if verified {
        info!(session_id = %state.session_id(), url = %url, "Deployment is reachable");
    } else {
        warn!(
            session_id = %state.session_id(),
            url = %url,
            timeout_ms = ctx.config.deploy_poll_timeout_ms,
            "Deployment did not answer before the timeout; recording it unverified"
        );
    }

    let state = state.apply_update(
        STEP,
        StateUpdate::default().with_deployment(DeploymentResult::Deployed {
            url: url.clone(),
            artifact_location: location,
            verified,
        }),
    )?;
    let details = json!({ "url": url, "verified": verified });
    ctx.decision(&state, STEP, "deployed", details.clone(), started.elapsed());
    ctx.remember(&state, STEP, "deployed", details, Importance::normal());
    Ok(state)
}

fn parse_payload(payload: Value) -> Result<DeployPayload, String> {
    if payload.is_null() {
        return Ok(DeployPayload {
            url: None,
            skipped: true,
            reason: Some("deployer returned no payload".to_string()),
        });
    }
    serde_json::from_value(payload).map_err(|e| e.to_string())
}

fn skipped(
    state: WorkflowState,
    ctx: &NodeContext,
    location: ArtifactLocation,
    reason: &str,
    started: Instant,
) -> Result<WorkflowState, StateError> {
    info!(session_id = %state.session_id(), reason, "Deployment skipped");
    let details = json!({ "reason": reason, "artifact_location": location });
    let state = state.apply_update(
        STEP,
        StateUpdate::default().with_deployment(DeploymentResult::Skipped {
            artifact_location: location,
            reason: reason.to_string(),
        }),
    )?;
    ctx.decision(&state, STEP, "skipped", details, started.elapsed());
    Ok(state)
}

/// Polls `url` every `interval` until it answers or `timeout` elapses.
///
/// Dropping the returned future stops the polling.
pub async fn wait_until_reachable(
    probe: &dyn ReachabilityProbe,
    url: &DeploymentUrl,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let poll = async {
        loop {
            if probe.is_reachable(url).await {
                return;
            }
            tokio::time::sleep(interval).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}
