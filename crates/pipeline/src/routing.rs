//! The fixed pipeline graph: step names, outgoing edges, and routers.
//!
//! ```text
//! intake ─▶ plan ─▶? build ─▶ test ─▶? deploy ─▶? finalize(success)
//!            │        ▲         │        │
//!            │        │         ▼        └──────▶ finalize(failure)
//!            │        └──? self_heal ───────────▶ finalize(failure)
//!            └────────────────────────────────────▶ finalize(failure)
//! ```
//!
//! `─▶?` edges are routed: a pure function of the state picks the target.
//! Every router sends a state carrying a fatal error to `finalize(failure)`
//! before looking at anything else.

use serde::{Deserialize, Serialize};

use crate::{WorkflowState, MAX_RETRIES};

/// How the workflow ends when it reaches `finalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failure,
}

/// One node of the pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Intake,
    Plan,
    Build,
    Test,
    SelfHeal,
    Deploy,
    Finalize(Verdict),
}

impl Step {
    /// The step every workflow starts at.
    pub const ENTRY: Step = Step::Intake;

    /// Stable lower-case name used in logs, progress events, and audit records.
    pub fn name(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Plan => "plan",
            Self::Build => "build",
            Self::Test => "test",
            Self::SelfHeal => "self_heal",
            Self::Deploy => "deploy",
            Self::Finalize(_) => "finalize",
        }
    }

    /// Only `finalize` ends a workflow.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalize(_))
    }

    /// The edge leaving this step, or `None` for `finalize`.
    pub fn outgoing(self) -> Option<Edge> {
        match self {
            Self::Intake => Some(Edge::Direct(Self::Plan)),
            Self::Plan => Some(Edge::Routed(route_after_plan)),
            Self::Build => Some(Edge::Direct(Self::Test)),
            Self::Test => Some(Edge::Routed(route_after_test)),
            Self::SelfHeal => Some(Edge::Routed(route_after_self_heal)),
            Self::Deploy => Some(Edge::Routed(route_after_deploy)),
            Self::Finalize(_) => None,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A router inspects the state a step returned and names the next step.
pub type Router = fn(&WorkflowState) -> Step;

/// An outgoing edge of the pipeline graph.
#[derive(Clone, Copy)]
pub enum Edge {
    /// Unconditional transition.
    Direct(Step),
    /// Transition chosen by a router.
    Routed(Router),
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct(step) => f.debug_tuple("Direct").field(step).finish(),
            Self::Routed(_) => f.write_str("Routed(..)"),
        }
    }
}

/// Follows the outgoing edge of `from` for `state`.
///
/// Returns `None` once `from` is terminal.
pub fn next_step(from: Step, state: &WorkflowState) -> Option<Step> {
    from.outgoing().map(|edge| match edge {
        Edge::Direct(to) => to,
        Edge::Routed(router) => router(state),
    })
}

const FAIL: Step = Step::Finalize(Verdict::Failure);

/// After `plan`: build only when a plan exists and planning recorded no error.
pub fn route_after_plan(state: &WorkflowState) -> Step {
    if state.has_fatal_error() {
        return FAIL;
    }
    let planning_failed = state.errors().iter().any(|e| e.step == Step::Plan);
    match state.plan() {
        Some(_) if !planning_failed => Step::Build,
        _ => FAIL,
    }
}

/// After `test`: deploy on a clean run, self-heal while retries remain.
pub fn route_after_test(state: &WorkflowState) -> Step {
    if state.has_fatal_error() {
        return FAIL;
    }
    let passed = state
        .validation_results()
        .is_some_and(|report| report.passed());
    if passed {
        Step::Deploy
    } else if state.retry_count() < MAX_RETRIES {
        Step::SelfHeal
    } else {
        FAIL
    }
}

/// After `self_heal`: the count has already been incremented by the step.
pub fn route_after_self_heal(state: &WorkflowState) -> Step {
    if state.has_fatal_error() {
        return FAIL;
    }
    if state.retry_count() < MAX_RETRIES {
        Step::Build
    } else {
        FAIL
    }
}

/// After `deploy`: a deployment URL or a recorded skip both count as success.
pub fn route_after_deploy(state: &WorkflowState) -> Step {
    if state.has_fatal_error() {
        return FAIL;
    }
    match state.deployment_result() {
        Some(_) => Step::Finalize(Verdict::Success),
        None => FAIL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ArtifactLocation, DeploymentResult, DeploymentUrl, ErrorKind, Plan, PlanUnit, SessionId,
        StateUpdate, ValidationReport,
    };

    fn fresh() -> WorkflowState {
        WorkflowState::create("build a todo app", SessionId::new("s-1").unwrap()).unwrap()
    }

    fn planned() -> WorkflowState {
        let plan = Plan {
            summary: "todo".into(),
            units: vec![PlanUnit {
                name: "api".into(),
                description: String::new(),
            }],
        };
        fresh()
            .apply_update(Step::Plan, StateUpdate::default().with_plan(plan))
            .unwrap()
    }

    fn tested(report: ValidationReport) -> WorkflowState {
        planned()
            .apply_update(Step::Test, StateUpdate::default().with_validation(report))
            .unwrap()
    }

    fn failing_report() -> ValidationReport {
        ValidationReport {
            checks_run: 3,
            failures: vec!["assertion failed".into()],
        }
    }

    fn healed(times: u32) -> WorkflowState {
        let mut state = tested(failing_report());
        for _ in 0..times {
            state = state.increment_retry().unwrap();
        }
        state
    }

    #[test]
    fn plan_routes_to_build_only_with_a_clean_plan() {
        assert_eq!(route_after_plan(&planned()), Step::Build);
        assert_eq!(route_after_plan(&fresh()), FAIL);

        let errored = planned()
            .record_error(Step::Plan, ErrorKind::ExternalCall, "planner timed out")
            .unwrap();
        assert_eq!(route_after_plan(&errored), FAIL);
    }

    #[test]
    fn test_routes_to_deploy_on_clean_run() {
        let state = tested(ValidationReport {
            checks_run: 2,
            failures: vec![],
        });
        assert_eq!(route_after_test(&state), Step::Deploy);
    }

    #[test]
    fn zero_checks_is_not_a_pass() {
        let state = tested(ValidationReport::default());
        assert_eq!(route_after_test(&state), Step::SelfHeal);
    }

    #[test]
    fn test_routes_to_failure_once_retries_are_spent() {
        assert_eq!(route_after_test(&healed(2)), Step::SelfHeal);
        assert_eq!(route_after_test(&healed(3)), FAIL);
    }

    #[test]
    fn self_heal_below_ceiling_goes_back_to_build_and_stays_running() {
        for n in 1..MAX_RETRIES {
            let state = healed(n);
            assert_eq!(route_after_self_heal(&state), Step::Build);
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn self_heal_at_ceiling_never_builds_again() {
        assert_eq!(route_after_self_heal(&healed(MAX_RETRIES)), FAIL);
    }

    #[test]
    fn fatal_errors_short_circuit_every_router() {
        let state = tested(ValidationReport {
            checks_run: 1,
            failures: vec![],
        })
        .record_error(Step::Build, ErrorKind::CapabilityExhausted, "budget spent")
        .unwrap();
        assert_eq!(route_after_test(&state), FAIL);
        assert_eq!(route_after_self_heal(&state), FAIL);
        assert_eq!(route_after_deploy(&state), FAIL);
    }

    #[test]
    fn deploy_succeeds_with_url_or_recorded_skip() {
        let location = ArtifactLocation::new("/work/s-1").unwrap();
        let deployed = planned()
            .apply_update(
                Step::Deploy,
                StateUpdate::default().with_deployment(DeploymentResult::Deployed {
                    url: DeploymentUrl::new("https://s-1.example.test").unwrap(),
                    artifact_location: location.clone(),
                    verified: true,
                }),
            )
            .unwrap();
        assert_eq!(route_after_deploy(&deployed), Step::Finalize(Verdict::Success));

        let skipped = planned()
            .apply_update(
                Step::Deploy,
                StateUpdate::default().with_deployment(DeploymentResult::Skipped {
                    artifact_location: location,
                    reason: "no target".into(),
                }),
            )
            .unwrap();
        assert_eq!(route_after_deploy(&skipped), Step::Finalize(Verdict::Success));

        assert_eq!(route_after_deploy(&planned()), FAIL);
    }

    #[test]
    fn graph_edges_follow_the_fixed_shape() {
        let state = planned();
        assert_eq!(next_step(Step::Intake, &state), Some(Step::Plan));
        assert_eq!(next_step(Step::Build, &state), Some(Step::Test));
        assert_eq!(next_step(Step::Finalize(Verdict::Success), &state), None);
        assert!(Step::Finalize(Verdict::Failure).is_terminal());
        assert_eq!(Step::SelfHeal.to_string(), "self_heal");
    }
}
