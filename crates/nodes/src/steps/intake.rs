//! Entry step: accepts the request and records what was received.
//!
//! The request is checked against the same limits the service applies at
//! admission, so a workflow driven straight through the executor cannot
//! carry an unacceptable request into planning.

use std::time::Instant;

use pipeline::{ErrorKind, Importance, StateError, StateUpdate, Step, WorkflowState};
use serde_json::{json, Map};
use tracing::{info, warn};

use crate::NodeContext;

const STEP: Step = Step::Intake;

/// Checks the request and stamps intake metadata.
pub async fn run(state: WorkflowState, ctx: &NodeContext) -> Result<WorkflowState, StateError> {
    let started = Instant::now();
    let request_chars = state.request_text().chars().count();

    if let Err(e) = ctx.config.check_request(state.request_text()) {
        warn!(session_id = %state.session_id(), request_chars, error = %e, "Request refused");
        let state = state.record_error(STEP, ErrorKind::InputValidation, e.to_string())?;
        ctx.decision(
            &state,
            STEP,
            "rejected",
            json!({ "request_chars": request_chars, "reason": e.to_string() }),
            started.elapsed(),
        );
        return Ok(state);
    }

    let mut fields = Map::new();
    fields.insert("request_chars".into(), json!(request_chars));
    fields.insert("received_at".into(), json!(state.started_at().to_string()));
    let state = state.apply_update(STEP, StateUpdate::from_fields(fields)?)?;

    info!(session_id = %state.session_id(), request_chars, "Request accepted");
    ctx.decision(
        &state,
        STEP,
        "accepted",
        json!({ "request_chars": request_chars }),
        started.elapsed(),
    );
    ctx.remember(
        &state,
        STEP,
        "request_received",
        json!({ "request": state.request_text() }),
        Importance::normal(),
    );
    Ok(state)
}
