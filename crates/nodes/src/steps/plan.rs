//! Asks the planner to decompose the request into units of work.

use std::time::Instant;

use pipeline::{
    AgentRole, ErrorKind, Importance, Plan, StateError, StateUpdate, Step, WorkflowState,
};
use serde_json::json;
use tracing::info;

use super::{call_failed, resources_exhausted};
use crate::NodeContext;

const STEP: Step = Step::Plan;

/// Obtains and stores an actionable plan.
pub async fn run(state: WorkflowState, ctx: &NodeContext) -> Result<WorkflowState, StateError> {
    let started = Instant::now();
    if state.has_fatal_error() {
        return Ok(state);
    }
    if let Err(e) = ctx.resources.check() {
        return resources_exhausted(state, STEP, &e);
    }

    let context = ctx.recall(&state, STEP).await;
    let input = json!({ "request": state.request_text() });
    let plan = match ctx
        .gateway
        .call_typed::<Plan>(AgentRole::Planner, state.session_id(), input, context)
        .await
    {
        Ok(plan) => plan,
        Err(e) => return call_failed(state, STEP, &e),
    };

    if !plan.is_actionable() {
        return state.record_error(STEP, ErrorKind::ExternalCall, "planner returned an empty plan");
    }

    let units: Vec<String> = plan.units.iter().map(|u| u.name.clone()).collect();
    let state = state.apply_update(STEP, StateUpdate::default().with_plan(plan))?;

    info!(session_id = %state.session_id(), units = units.len(), "Plan accepted");
    ctx.decision(
        &state,
        STEP,
        "planned",
        json!({ "units": units }),
        started.elapsed(),
    );
    ctx.remember(&state, STEP, "planned", json!({ "units": units }), Importance::normal());
    Ok(state)
}
