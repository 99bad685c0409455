//! The seven step functions of the pipeline graph.
//!
//! Each step takes the workflow state by value and returns the transformed
//! state. Steps never route: they record what happened (results, errors,
//! retry count) and the routers in [`pipeline::routing`] decide what runs
//! next. A step returns `Err` only when a state transition itself was refused,
//! which is a programming error, never an agent or environment failure.
//!
//! | Step | Calls | Writes |
//! |------|-------|--------|
//! | [`intake`] | nothing | request metadata in context |
//! | [`plan`] | planner | `plan` |
//! | [`build`] | builder | `generated_artifacts` |
//! | [`test`] | tester | `validation_results` |
//! | [`self_heal`] | nothing | `retry_count` |
//! | [`deploy`] | deployer, reachability probe | `deployment_result` |
//! | [`finalize`] | nothing | terminal status, elapsed time |

pub mod build;
pub mod deploy;
pub mod finalize;
pub mod intake;
pub mod plan;
pub mod self_heal;
pub mod test;

use pipeline::{ErrorKind, ResourceExhausted, StateError, Step, WorkflowState};
use tracing::warn;

use crate::AgentCallError;

/// Records a failed agent call against `step`.
fn call_failed(
    state: WorkflowState,
    step: Step,
    error: &AgentCallError,
) -> Result<WorkflowState, StateError> {
    warn!(
        session_id = %state.session_id(),
        step = %step,
        kind = %error.error_kind(),
        error = %error,
        "Agent call failed"
    );
    state.record_error(step, error.error_kind(), error.to_string())
}

/// Records that `step` refused to start on an overloaded host.
fn resources_exhausted(
    state: WorkflowState,
    step: Step,
    error: &ResourceExhausted,
) -> Result<WorkflowState, StateError> {
    warn!(
        session_id = %state.session_id(),
        step = %step,
        error = %error,
        "Host resources exhausted; not starting step"
    );
    state.record_error(step, ErrorKind::ResourceExhausted, error.to_string())
}
