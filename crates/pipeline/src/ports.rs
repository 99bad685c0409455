//! Port traits for every collaborator outside the orchestration core.
//!
//! Infrastructure crates implement these; the `nodes` crate consumes them
//! through `Arc<dyn Trait>` handles injected at construction time. None of the
//! traits expose transport or storage details.
//!
//! | Port | Direction | Implemented by |
//! |------|-----------|----------------|
//! | [`Agent`] | consumed | `agents::HttpAgent` |
//! | [`ReachabilityProbe`] | consumed | `agents::HttpReachabilityProbe` |
//! | [`AuditLog`] | consumed | `journal::JsonlAuditLog`, `journal::TracingAuditLog` |
//! | [`EpisodicMemory`] | consumed | `journal::InMemoryEpisodicMemory` |
//! | [`ResourceMonitor`] | consumed | `nodes::MemInfoMonitor` |
//! | [`ProgressObserver`] | exposed | `nodes::ProgressHub` |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{DeploymentUrl, Importance, ResourceExhausted, RetryPolicy, SessionId, Timestamp};

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// The content-generation capability an agent provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Builder,
    Tester,
    Deployer,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planner => "planner",
            Self::Builder => "builder",
            Self::Tester => "tester",
            Self::Deployer => "deployer",
        };
        f.write_str(s)
    }
}

/// A typed request to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub role: AgentRole,
    pub session_id: SessionId,
    /// Step-specific input (plan spec, state-derived build input, ...).
    pub input: Value,
    /// Recall from episodic memory, when the step asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// The structured result every agent returns.
///
/// The orchestrator reads only the success flag, the payload, and the error
/// list; it never inspects agent internals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl AgentResponse {
    /// A successful response carrying `payload`.
    pub fn succeeded(payload: Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            errors: Vec::new(),
        }
    }

    /// A structured failure report.
    pub fn failed(errors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            success: false,
            payload: None,
            errors: errors.into_iter().map(Into::into).collect(),
        }
    }
}

/// The agent could not be reached or answered with something unusable.
///
/// Distinct from an [`AgentResponse`] with `success = false`, which is a
/// well-formed report of failed work.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message}")]
pub struct AgentTransportError {
    pub message: String,
    pub retry: RetryPolicy,
}

impl AgentTransportError {
    /// A failure worth retrying on the backoff schedule.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry: RetryPolicy::Retryable { after: None },
        }
    }

    /// A failure that repeats however often it is retried.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry: RetryPolicy::NonRetryable,
        }
    }
}

/// A content-generation service (planner, builder, tester or deployer).
#[async_trait]
pub trait Agent: Send + Sync {
    /// Performs one unit of agent work. May suspend for the duration of an
    /// external operation.
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentTransportError>;
}

/// Checks whether a freshly deployed URL is answering.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self, url: &DeploymentUrl) -> bool;
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// A routing or execution decision taken by a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDecision {
    pub session_id: SessionId,
    pub step: String,
    pub action: String,
    pub details: Value,
    pub duration_ms: u64,
}

/// A change to a generated artefact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactOperation {
    pub session_id: SessionId,
    pub step: String,
    pub operation: String,
    pub path: String,
    pub reason: String,
}

/// Durable, append-only record of what the pipeline did and why.
///
/// Both methods are fire-and-forget: they return immediately, never fail,
/// and the caller does not wait for durability.
pub trait AuditLog: Send + Sync {
    fn log_step_decision(&self, decision: StepDecision);
    fn log_artifact_operation(&self, operation: ArtifactOperation);

    /// The session's workflow has ended; per-session bookkeeping may go.
    fn close_session(&self, _session_id: &SessionId) {}
}

// ---------------------------------------------------------------------------
// Episodic memory
// ---------------------------------------------------------------------------

/// One remembered event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub session_id: SessionId,
    pub step: String,
    pub action: String,
    pub data: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    pub importance: Importance,
}

/// Per-session indexed log used for contextual recall.
#[async_trait]
pub trait EpisodicMemory: Send + Sync {
    /// Renders up to `max_entries` remembered events relevant to `step` as
    /// prompt context. `None` when there is nothing to recall.
    async fn get_context(
        &self,
        session_id: &SessionId,
        step: &str,
        max_entries: usize,
    ) -> Option<String>;

    /// Records an entry without waiting for it to be stored.
    fn add_entry(&self, entry: MemoryEntry);
}

// ---------------------------------------------------------------------------
// Host resources
// ---------------------------------------------------------------------------

/// Reports whether the host can take on expensive work.
pub trait ResourceMonitor: Send + Sync {
    /// # Errors
    ///
    /// [`ResourceExhausted`] when a resource is critical.
    fn check(&self) -> Result<(), ResourceExhausted>;
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Where a step is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A notification emitted before and after every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: SessionId,
    /// Position of this event in the workflow's event stream, starting at 0.
    pub sequence: u64,
    pub step: String,
    pub status: ProgressStatus,
    pub message: String,
    pub details: Value,
    pub timestamp: Timestamp,
}

/// The sole channel through which callers learn about pipeline progress.
///
/// `notify` must not block and must not fail; implementations swallow (and
/// log) delivery problems.
pub trait ProgressObserver: Send + Sync {
    fn notify(&self, event: ProgressEvent);
}
