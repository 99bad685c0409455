//! Validates the current build.
//!
//! Every cycle leaves a fresh report behind, even when the tester is never
//! reached, so the router always judges the attempt that just ran.

use std::time::Instant;

use pipeline::{
    AgentRole, ErrorKind, Importance, StateError, StateUpdate, Step, ValidationReport,
    WorkflowState,
};
use serde_json::json;
use tracing::info;

use super::call_failed;
use crate::NodeContext;

const STEP: Step = Step::Test;

/// Validates the current attempt's artefacts.
pub async fn run(state: WorkflowState, ctx: &NodeContext) -> Result<WorkflowState, StateError> {
    let started = Instant::now();
    if state.has_fatal_error() {
        return Ok(state);
    }

    let current = state
        .generated_artifacts()
        .filter(|_| !state.failed_in_current_attempt(Step::Build))
        .cloned();
    let Some(artifacts) = current else {
        let state = state.apply_update(
            STEP,
            StateUpdate::default()
                .with_validation(ValidationReport::not_run("build failed in this attempt")),
        )?;
        return state.record_error(
            STEP,
            ErrorKind::ValidationFailed,
            "validation skipped: the build did not produce artefacts",
        );
    };

    let input = json!({
        "artifact_location": artifacts.artifact_location,
        "files": artifacts.files,
        "plan": state.plan(),
    });
    let report = match ctx
        .gateway
        .call_typed::<ValidationReport>(AgentRole::Tester, state.session_id(), input, None)
        .await
    {
        Ok(report) => report,
        Err(e) => {
            let state = state.apply_update(
                STEP,
                StateUpdate::default()
                    .with_validation(ValidationReport::not_run("tester was unavailable")),
            )?;
            return call_failed(state, STEP, &e);
        }
    };

    let passed = report.passed();
    let summary = json!({
        "checks_run": report.checks_run,
        "failures": report.failures,
        "passed": passed,
    });
    let failure_message = failure_message(&report);
    let state = state.apply_update(STEP, StateUpdate::default().with_validation(report))?;

    info!(session_id = %state.session_id(), passed, attempt = state.retry_count(), "Validation finished");
    ctx.decision(&state, STEP, if passed { "passed" } else { "failed" }, summary.clone(), started.elapsed());

    if passed {
        ctx.remember(&state, STEP, "passed", summary, Importance::normal());
        return Ok(state);
    }
    ctx.remember(&state, STEP, "failed", summary, Importance::high());
    state.record_error(STEP, ErrorKind::ValidationFailed, failure_message)
}

fn failure_message(report: &ValidationReport) -> String {
    if report.checks_run == 0 {
        return "no validation checks ran".to_string();
    }
    match report.failures.first() {
        Some(first) => format!(
            "{} of {} checks failed (first: {first})",
            report.failures.len(),
            report.checks_run
        ),
        None => "validation failed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_message_names_the_first_failure() {
        let report = ValidationReport {
            checks_run: 4,
            failures: vec!["lint".into(), "unit".into()],
        };
        assert_eq!(failure_message(&report), "2 of 4 checks failed (first: lint)");
    }

    #[test]
    fn empty_report_is_explained() {
        assert_eq!(
            failure_message(&ValidationReport::default()),
            "no validation checks ran"
        );
    }
}
