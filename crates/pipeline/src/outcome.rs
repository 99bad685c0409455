//! Point-in-time view of a workflow, as returned across the request/result
//! boundary.

use serde::{Deserialize, Serialize};

use crate::{
    ArtifactLocation, DeploymentUrl, SessionId, Step, Timestamp, WorkflowState, WorkflowStatus,
};

/// What a caller sees when it asks for a session's result.
///
/// `error` is always `Some` when `success` is `false`, including while the
/// workflow is still running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub session_id: SessionId,
    pub status: WorkflowStatus,
    pub success: bool,
    /// `false` while the workflow is still running.
    pub terminal: bool,
    pub current_step: Step,
    pub retry_count: u32,
    pub artifact_location: Option<ArtifactLocation>,
    pub deployment_url: Option<DeploymentUrl>,
    pub error: Option<String>,
    /// Total run time once terminal; time so far otherwise.
    pub elapsed_ms: u64,
}

impl WorkflowOutcome {
    /// Summarises `state`, quoting at most `error_limit` recorded errors.
    pub fn from_state(state: &WorkflowState, error_limit: usize) -> Self {
        let success = state.status() == WorkflowStatus::Completed;
        let error = match state.status() {
            WorkflowStatus::Completed => None,
            WorkflowStatus::Running => Some(format!(
                "workflow is still running (current step: {})",
                state.current_step()
            )),
            WorkflowStatus::Failed => Some(summarise_errors(state, error_limit)),
        };
        let elapsed_ms = state
            .elapsed_ms()
            .unwrap_or_else(|| Timestamp::now().millis_since(state.started_at()));

        Self {
            session_id: state.session_id().clone(),
            status: state.status(),
            success,
            terminal: state.is_terminal(),
            current_step: state.current_step(),
            retry_count: state.retry_count(),
            artifact_location: state.artifact_location().cloned(),
            deployment_url: state.deployment_result().and_then(|d| d.url()).cloned(),
            error,
            elapsed_ms,
        }
    }

    /// A workflow that stopped without reaching `finalize` (cancelled, or
    /// aborted by an engine error). Reported as a terminal failure.
    pub fn interrupted(state: &WorkflowState, reason: impl Into<String>) -> Self {
        let mut outcome = Self::from_state(state, 0);
        if !outcome.terminal {
            outcome.status = WorkflowStatus::Failed;
            outcome.terminal = true;
            outcome.success = false;
            outcome.error = Some(reason.into());
        }
        outcome
    }
}

fn summarise_errors(state: &WorkflowState, limit: usize) -> String {
    let errors = state.errors();
    if errors.is_empty() {
        return "workflow failed without a recorded error".to_string();
    }
    let quoted: Vec<String> = errors.iter().take(limit.max(1)).map(ToString::to_string).collect();
    let mut summary = quoted.join("; ");
    let hidden = errors.len().saturating_sub(quoted.len());
    if hidden > 0 {
        summary.push_str(&format!(" (and {hidden} more)"));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, Verdict};

    fn state() -> WorkflowState {
        WorkflowState::create("ship it", SessionId::new("o-1").unwrap()).unwrap()
    }

    #[test]
    fn running_state_is_not_terminal_but_explains_itself() {
        let outcome = WorkflowOutcome::from_state(&state(), 3);
        assert!(!outcome.success);
        assert!(!outcome.terminal);
        assert!(outcome.error.unwrap().contains("still running"));
    }

    #[test]
    fn failure_quotes_the_first_errors_only() {
        let mut s = state();
        for i in 0..5 {
            s = s
                .record_error(Step::Test, ErrorKind::ValidationFailed, format!("failure {i}"))
                .unwrap();
        }
        let s = s.finalize(Verdict::Failure, 42).unwrap();
        let outcome = WorkflowOutcome::from_state(&s, 3);

        assert!(outcome.terminal);
        assert_eq!(outcome.elapsed_ms, 42);
        let error = outcome.error.unwrap();
        assert!(error.starts_with("test: failure 0; test: failure 1; test: failure 2"));
        assert!(error.ends_with("(and 2 more)"));
    }

    #[test]
    fn success_has_no_error() {
        let s = state().finalize(Verdict::Success, 7).unwrap();
        let outcome = WorkflowOutcome::from_state(&s, 3);
        assert!(outcome.success);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn interrupted_marks_running_state_failed() {
        let outcome = WorkflowOutcome::interrupted(&state(), "workflow was cancelled");
        assert!(outcome.terminal);
        assert!(!outcome.success);
        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("workflow was cancelled"));
    }
}
