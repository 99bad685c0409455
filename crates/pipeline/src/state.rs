//! The workflow state threaded through every step.
//!
//! A [`WorkflowState`] is created once per request and owned by the executor
//! for its lifetime. Steps receive it by value and hand back a new version
//! produced by one of the transition methods below; the fields themselves are
//! private so no other code path can mutate them.
//!
//! Invariants held at every observable point:
//!
//! - `retry_count` never decreases and never exceeds [`MAX_RETRIES`].
//! - `errors` never shrinks.
//! - A populated optional slot (`plan`, `generated_artifacts`,
//!   `validation_results`, `deployment_result`) is never cleared; a later
//!   update may only replace it with another value.
//! - `status` stays `running` until [`WorkflowState::finalize`], after which
//!   every transition fails with [`StateError::AlreadyFinalized`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    ArtifactLocation, DeploymentResult, ErrorKind, ErrorRecord, GeneratedArtifacts, Plan,
    SessionId, Step, Timestamp, ValidationReport, Verdict, WorkflowStatus,
};

/// Ceiling for `retry_count`: the number of self-heal cycles a workflow may run.
pub const MAX_RETRIES: u32 = 3;

/// Top-level field names that `apply_update` must never touch.
const PROTECTED_FIELDS: &[&str] = &[
    "request_text",
    "session_id",
    "errors",
    "retry_count",
    "current_step",
    "status",
    "started_at",
    "last_updated_at",
    "elapsed_ms",
];

/// A transition was applied that the state model does not permit.
///
/// These are programming errors in a step function; the executor aborts the
/// workflow when it sees one rather than routing around it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("request text must not be empty")]
    EmptyRequest,

    #[error("workflow {session_id} is already {status}; no further transitions are permitted")]
    AlreadyFinalized {
        session_id: SessionId,
        status: WorkflowStatus,
    },

    #[error("retry ceiling of {max} reached")]
    RetryCeilingReached { max: u32 },

    #[error("field '{field}' cannot be set through apply_update")]
    ProtectedField { field: String },

    #[error("field '{field}' has an invalid value: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("state invariant violated: {0}")]
    Invariant(String),
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// The changes a step wants applied to the state.
///
/// `None` slots are left untouched; there is no way to clear a slot. The
/// `context` map is shallow-merged into the side channel: new keys are added,
/// existing keys are overwritten only when present here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub plan: Option<Plan>,
    pub generated_artifacts: Option<GeneratedArtifacts>,
    pub validation_results: Option<ValidationReport>,
    pub deployment_result: Option<DeploymentResult>,
    pub context: BTreeMap<String, Value>,
}

impl StateUpdate {
    /// Sets the plan slot.
    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Sets the generated-artefacts slot.
    pub fn with_artifacts(mut self, artifacts: GeneratedArtifacts) -> Self {
        self.generated_artifacts = Some(artifacts);
        self
    }

    /// Sets the validation-results slot.
    pub fn with_validation(mut self, report: ValidationReport) -> Self {
        self.validation_results = Some(report);
        self
    }

    /// Sets the deployment-result slot.
    pub fn with_deployment(mut self, result: DeploymentResult) -> Self {
        self.deployment_result = Some(result);
        self
    }

    /// Sets one side-channel key, overwriting any previous value.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Builds an update from loosely-typed fields.
    ///
    /// Recognised slot names are decoded into their typed slots. A
    /// `side_channel_context` object is merged entry by entry. Any other
    /// unrecognised key goes into the side channel as-is.
    ///
    /// # Errors
    ///
    /// - [`StateError::ProtectedField`] for identifiers, counters, status and
    ///   timestamps, which only dedicated transitions may change.
    /// - [`StateError::InvalidField`] when a slot value does not decode.
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self, StateError> {
        let mut update = Self::default();
        for (key, value) in fields {
            match key.as_str() {
                k if PROTECTED_FIELDS.contains(&k) => {
                    return Err(StateError::ProtectedField { field: key });
                }
                "plan" => update.plan = Some(decode(&key, value)?),
                "generated_artifacts" => update.generated_artifacts = Some(decode(&key, value)?),
                "validation_results" => update.validation_results = Some(decode(&key, value)?),
                "deployment_result" => update.deployment_result = Some(decode(&key, value)?),
                "side_channel_context" => match value {
                    Value::Object(entries) => update.context.extend(entries),
                    _ => {
                        return Err(StateError::InvalidField {
                            field: key,
                            reason: "expected an object".into(),
                        })
                    }
                },
                _ => {
                    update.context.insert(key, value);
                }
            }
        }
        Ok(update)
    }
}

fn decode<T: serde::de::DeserializeOwned>(field: &str, value: Value) -> Result<T, StateError> {
    serde_json::from_value(value).map_err(|e| StateError::InvalidField {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The single record carrying all accumulated pipeline data for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    request_text: String,
    session_id: SessionId,
    plan: Option<Plan>,
    generated_artifacts: Option<GeneratedArtifacts>,
    validation_results: Option<ValidationReport>,
    deployment_result: Option<DeploymentResult>,
    errors: Vec<ErrorRecord>,
    retry_count: u32,
    current_step: Step,
    status: WorkflowStatus,
    started_at: Timestamp,
    last_updated_at: Timestamp,
    elapsed_ms: Option<u64>,
    side_channel_context: BTreeMap<String, Value>,
}

impl WorkflowState {
    /// Creates the initial state: all slots empty, no errors, `running`.
    ///
    /// # Errors
    ///
    /// [`StateError::EmptyRequest`] if `request` is blank.
    pub fn create(request: impl Into<String>, session_id: SessionId) -> Result<Self, StateError> {
        let request_text = request.into();
        if request_text.trim().is_empty() {
            return Err(StateError::EmptyRequest);
        }
        let now = Timestamp::now();
        Self {
            request_text,
            session_id,
            plan: None,
            generated_artifacts: None,
            validation_results: None,
            deployment_result: None,
            errors: Vec::new(),
            retry_count: 0,
            current_step: Step::ENTRY,
            status: WorkflowStatus::Running,
            started_at: now,
            last_updated_at: now,
            elapsed_ms: None,
            side_channel_context: BTreeMap::new(),
        }
        .checked()
    }

    // -- transitions --------------------------------------------------------

    /// Applies a step's output and marks `step` as the current step.
    ///
    /// # Errors
    ///
    /// [`StateError::AlreadyFinalized`] on a terminal state.
    pub fn apply_update(mut self, step: Step, update: StateUpdate) -> Result<Self, StateError> {
        self.ensure_running()?;
        let StateUpdate {
            plan,
            generated_artifacts,
            validation_results,
            deployment_result,
            context,
        } = update;

        self.current_step = step;
        if plan.is_some() {
            self.plan = plan;
        }
        if generated_artifacts.is_some() {
            self.generated_artifacts = generated_artifacts;
        }
        if validation_results.is_some() {
            self.validation_results = validation_results;
        }
        if deployment_result.is_some() {
            self.deployment_result = deployment_result;
        }
        self.side_channel_context.extend(context);
        self.touch();
        self.checked()
    }

    /// Appends a structured error entry. Prior entries are never removed.
    ///
    /// # Errors
    ///
    /// [`StateError::AlreadyFinalized`] on a terminal state.
    pub fn record_error(
        mut self,
        step: Step,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<Self, StateError> {
        self.ensure_running()?;
        self.touch();
        self.errors.push(ErrorRecord {
            step,
            kind,
            message: message.into(),
            timestamp: self.last_updated_at,
            retry_count: self.retry_count,
        });
        self.checked()
    }

    /// Increments `retry_count` by exactly one.
    ///
    /// # Errors
    ///
    /// - [`StateError::AlreadyFinalized`] on a terminal state.
    /// - [`StateError::RetryCeilingReached`] once the count is at [`MAX_RETRIES`].
    pub fn increment_retry(mut self) -> Result<Self, StateError> {
        self.ensure_running()?;
        if self.retry_count >= MAX_RETRIES {
            return Err(StateError::RetryCeilingReached { max: MAX_RETRIES });
        }
        self.retry_count += 1;
        self.touch();
        self.checked()
    }

    /// Stamps the terminal status and total elapsed time.
    ///
    /// This is the only transition that leaves `running`.
    ///
    /// # Errors
    ///
    /// - [`StateError::AlreadyFinalized`] if called twice.
    /// - [`StateError::Invariant`] when failing a workflow with no recorded
    ///   error; a failed workflow must always explain itself.
    pub fn finalize(mut self, verdict: Verdict, elapsed_ms: u64) -> Result<Self, StateError> {
        self.ensure_running()?;
        if verdict == Verdict::Failure && self.errors.is_empty() {
            return Err(StateError::Invariant(
                "a failed workflow must carry at least one error".into(),
            ));
        }
        self.status = match verdict {
            Verdict::Success => WorkflowStatus::Completed,
            Verdict::Failure => WorkflowStatus::Failed,
        };
        self.current_step = Step::Finalize(verdict);
        self.elapsed_ms = Some(elapsed_ms);
        self.touch();
        self.checked()
    }

    /// Checks the structural invariants of the state.
    ///
    /// Runs after every transition in debug and test builds.
    ///
    /// # Errors
    ///
    /// [`StateError::Invariant`] describing the first violation found.
    pub fn validate(&self) -> Result<(), StateError> {
        let fail = |msg: &str| Err(StateError::Invariant(msg.to_string()));

        if self.request_text.trim().is_empty() {
            return fail("request_text is empty");
        }
        if self.retry_count > MAX_RETRIES {
            return fail("retry_count exceeds the ceiling");
        }
        if self.status.is_terminal() != self.elapsed_ms.is_some() {
            return fail("elapsed_ms must be set exactly when the status is terminal");
        }
        if self.status.is_terminal() != self.current_step.is_terminal() {
            return fail("a terminal status must sit on the finalize step");
        }
        if self.status == WorkflowStatus::Failed && self.errors.is_empty() {
            return fail("a failed workflow carries no errors");
        }
        if self.last_updated_at < self.started_at {
            return fail("last_updated_at precedes started_at");
        }
        if self
            .errors
            .windows(2)
            .any(|pair| pair[1].timestamp < pair[0].timestamp)
        {
            return fail("error timestamps are out of order");
        }
        if self.errors.iter().any(|e| e.retry_count > self.retry_count) {
            return fail("an error was recorded at a retry count above the current one");
        }
        Ok(())
    }

    fn checked(self) -> Result<Self, StateError> {
        if cfg!(debug_assertions) {
            self.validate()?;
        }
        Ok(self)
    }

    fn ensure_running(&self) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::AlreadyFinalized {
                session_id: self.session_id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    // Clamped so a wall-clock step backwards never reorders the history.
    fn touch(&mut self) {
        self.last_updated_at = Timestamp::now().max(self.last_updated_at);
    }

    // -- queries ------------------------------------------------------------

    /// The request as submitted.
    pub fn request_text(&self) -> &str {
        &self.request_text
    }

    /// The session this workflow runs under.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The accepted plan, once planning succeeded.
    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    /// Output of the latest successful build.
    pub fn generated_artifacts(&self) -> Option<&GeneratedArtifacts> {
        self.generated_artifacts.as_ref()
    }

    /// The report of the latest test step.
    pub fn validation_results(&self) -> Option<&ValidationReport> {
        self.validation_results.as_ref()
    }

    /// How deployment ended, once it ran.
    pub fn deployment_result(&self) -> Option<&DeploymentResult> {
        self.deployment_result.as_ref()
    }

    /// Every error recorded so far, oldest first.
    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Self-heal cycles started so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// The step that last touched the state.
    pub fn current_step(&self) -> Step {
        self.current_step
    }

    /// Running until `finalize` sets a verdict.
    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    /// When the state was created.
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// When the last transition happened.
    pub fn last_updated_at(&self) -> Timestamp {
        self.last_updated_at
    }

    /// Wall-clock run time, set by `finalize`.
    pub fn elapsed_ms(&self) -> Option<u64> {
        self.elapsed_ms
    }

    /// Values steps pass to later steps outside the typed slots.
    pub fn side_channel_context(&self) -> &BTreeMap<String, Value> {
        &self.side_channel_context
    }

    /// One side-channel value.
    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.side_channel_context.get(key)
    }

    /// Whether `finalize` has run.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `true` once any recorded error is of a fatal kind.
    pub fn has_fatal_error(&self) -> bool {
        self.errors.iter().any(|e| e.kind.is_fatal())
    }

    /// `true` if `step` recorded an error during the current build/test cycle.
    pub fn failed_in_current_attempt(&self, step: Step) -> bool {
        self.errors
            .iter()
            .any(|e| e.step == step && e.retry_count == self.retry_count)
    }

    /// Where the artefact ended up: the deployment's record if there is one,
    /// otherwise the build output.
    pub fn artifact_location(&self) -> Option<&ArtifactLocation> {
        self.deployment_result
            .as_ref()
            .map(DeploymentResult::artifact_location)
            .or_else(|| {
                self.generated_artifacts
                    .as_ref()
                    .map(|a| &a.artifact_location)
            })
    }
}
