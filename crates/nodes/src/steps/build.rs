//! Asks the builder to produce artefacts from the plan.
//!
//! On a self-heal cycle the builder also receives the failures of the
//! previous attempt and the working directory it used last time, so it can
//! repair rather than start over.

use std::time::Instant;

use pipeline::{
    AgentRole, ErrorKind, GeneratedArtifacts, Importance, StateError, StateUpdate, Step,
    WorkflowState,
};
use serde_json::{json, Value};
use tracing::info;

use super::{call_failed, resources_exhausted};
use crate::NodeContext;

const STEP: Step = Step::Build;

/// Previous errors forwarded to the builder on a repair attempt.
const FORWARDED_ERRORS: usize = 5;

/// Runs one build attempt.
pub async fn run(state: WorkflowState, ctx: &NodeContext) -> Result<WorkflowState, StateError> {
    let started = Instant::now();
    if let Err(e) = ctx.resources.check() {
        return resources_exhausted(state, STEP, &e);
    }
    let Some(plan) = state.plan() else {
        return state.record_error(STEP, ErrorKind::Unrecoverable, "build started without a plan");
    };

    let attempt = state.retry_count();
    let previous_errors: Vec<String> = state
        .errors()
        .iter()
        .rev()
        .take(FORWARDED_ERRORS)
        .map(ToString::to_string)
        .collect();
    let input = json!({
        "request": state.request_text(),
        "plan": plan,
        "attempt": attempt,
        "previous_failures": state.validation_results().map(|r| &r.failures),
        "previous_errors": previous_errors,
        "working_directory": state.context_value("working_directory"),
    });
    let context = ctx.recall(&state, STEP).await;

    let artifacts = match ctx
        .gateway
        .call_typed::<GeneratedArtifacts>(AgentRole::Builder, state.session_id(), input, context)
        .await
    {
        Ok(artifacts) => artifacts,
        Err(e) => return call_failed(state, STEP, &e),
    };

    let location = artifacts.artifact_location.as_str().to_string();
    let files = artifacts.files.len();
    let state = state.apply_update(
        STEP,
        StateUpdate::default()
            .with_artifacts(artifacts)
            .with_context("working_directory", Value::String(location.clone()))
            .with_context("last_build_attempt", attempt),
    )?;

    info!(session_id = %state.session_id(), attempt, files, location = %location, "Build produced artefacts");
    let (operation, reason) = if attempt == 0 {
        ("create", "initial build".to_string())
    } else {
        ("rebuild", format!("self-heal attempt {attempt}"))
    };
    ctx.artifact(&state, STEP, operation, &location, reason);
    ctx.decision(
        &state,
        STEP,
        "built",
        json!({ "attempt": attempt, "files": files, "artifact_location": location }),
        started.elapsed(),
    );
    ctx.remember(
        &state,
        STEP,
        "built",
        json!({ "attempt": attempt, "artifact_location": location }),
        Importance::low(),
    );
    Ok(state)
}
