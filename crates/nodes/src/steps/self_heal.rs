//! Opens another build/test cycle after a failed validation.

use std::time::Instant;

use pipeline::{
    ErrorKind, Importance, StateError, StateUpdate, Step, WorkflowState, MAX_RETRIES,
};
use serde_json::json;
use tracing::{info, warn};

use crate::NodeContext;

const STEP: Step = Step::SelfHeal;

/// Counts one retry and records what to learn from the failure.
pub async fn run(state: WorkflowState, ctx: &NodeContext) -> Result<WorkflowState, StateError> {
    let started = Instant::now();
    if state.retry_count() >= MAX_RETRIES {
        warn!(session_id = %state.session_id(), "Self-heal requested with no retries left");
        return state.record_error(
            STEP,
            ErrorKind::RetryExhausted,
            format!("no self-heal attempts left after {MAX_RETRIES}"),
        );
    }

    let failures: Vec<String> = state
        .errors()
        .iter()
        .filter(|e| e.retry_count == state.retry_count())
        .map(ToString::to_string)
        .collect();
    let last_failure = failures.last().cloned().unwrap_or_default();

    let state = state.increment_retry()?;
    let attempt = state.retry_count();
    let state = state.apply_update(
        STEP,
        StateUpdate::default()
            .with_context("last_failure", last_failure)
            .with_context("heal_attempts", attempt),
    )?;

    info!(session_id = %state.session_id(), attempt, max = MAX_RETRIES, "Starting self-heal cycle");
    ctx.decision(
        &state,
        STEP,
        "retry",
        json!({ "retry_count": attempt, "failures": failures }),
        started.elapsed(),
    );
    // Lessons from failed attempts are what later recalls surface first.
    ctx.remember(
        &state,
        STEP,
        "lesson",
        json!({ "attempt": attempt, "failures": failures }),
        Importance::high(),
    );
    Ok(state)
}
