//! Terminal step: stamps the verdict and the total run time.

use pipeline::{
    ErrorKind, Importance, StateError, Step, Verdict, WorkflowState, MAX_RETRIES,
};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use crate::NodeContext;

/// Makes sure a failing workflow explains itself, then finalizes it.
///
/// A failure reached by running out of self-heal cycles gets a
/// [`ErrorKind::RetryExhausted`] entry; a failure with no error at all gets an
/// [`ErrorKind::Unrecoverable`] one.
pub async fn run(
    state: WorkflowState,
    verdict: Verdict,
    elapsed_ms: u64,
    ctx: &NodeContext,
) -> Result<WorkflowState, StateError> {
    let step = Step::Finalize(verdict);
    let mut state = state;

    if verdict == Verdict::Failure {
        let validation_failed = state.validation_results().map_or(true, |r| !r.passed());
        let exhausted_recorded = state
            .errors()
            .iter()
            .any(|e| e.kind == ErrorKind::RetryExhausted);
        if state.retry_count() >= MAX_RETRIES
            && validation_failed
            && !state.has_fatal_error()
            && !exhausted_recorded
        {
            state = state.record_error(
                step,
                ErrorKind::RetryExhausted,
                format!("validation still failing after {MAX_RETRIES} self-heal attempts"),
            )?;
        }
        if state.errors().is_empty() {
            state = state.record_error(
                step,
                ErrorKind::Unrecoverable,
                "workflow ended without a successful outcome",
            )?;
        }
    }

    let state = state.finalize(verdict, elapsed_ms)?;
    let details = json!({
        "retry_count": state.retry_count(),
        "errors": state.errors().len(),
        "artifact_location": state.artifact_location(),
        "deployment_url": state.deployment_result().and_then(|d| d.url()),
    });

    match verdict {
        Verdict::Success => info!(
            session_id = %state.session_id(),
            retry_count = state.retry_count(),
            elapsed_ms,
            "Workflow completed"
        ),
        Verdict::Failure => warn!(
            session_id = %state.session_id(),
            retry_count = state.retry_count(),
            errors = state.errors().len(),
            elapsed_ms,
            "Workflow failed"
        ),
    }
    let (action, importance) = match verdict {
        Verdict::Success => ("completed", Importance::normal()),
        Verdict::Failure => ("failed", Importance::high()),
    };
    ctx.decision(
        &state,
        step,
        action,
        details.clone(),
        Duration::from_millis(elapsed_ms),
    );
    ctx.remember(&state, step, action, details, importance);
    Ok(state)
}
