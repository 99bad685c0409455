//! Values produced by the steps and read by the routers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ArtifactLocation, DeploymentUrl, Step};

// ---------------------------------------------------------------------------
// Agent outputs stored in the workflow state
// ---------------------------------------------------------------------------

/// One unit of work in a [`Plan`] (a component, endpoint, or file group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanUnit {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// The output of the planning agent.
///
/// A plan with zero units is never stored; the plan step records it as a
/// failure instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub summary: String,
    pub units: Vec<PlanUnit>,
}

impl Plan {
    /// Returns `true` if the plan has at least one unit of work.
    pub fn is_actionable(&self) -> bool {
        !self.units.is_empty()
    }
}

/// The output of the build agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifacts {
    pub artifact_location: ArtifactLocation,
    /// Paths of the generated files, relative to `artifact_location`.
    #[serde(default)]
    pub files: Vec<String>,
}

/// The output of the test agent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub checks_run: u32,
    #[serde(default)]
    pub failures: Vec<String>,
}

impl ValidationReport {
    /// A report for a validation pass that could not run at all.
    pub fn not_run(reason: impl Into<String>) -> Self {
        Self {
            checks_run: 0,
            failures: vec![reason.into()],
        }
    }

    /// A run passes only when at least one check ran and none failed.
    pub fn passed(&self) -> bool {
        self.checks_run >= 1 && self.failures.is_empty()
    }
}

/// The outcome of the deploy step.
///
/// `Skipped` is a non-fatal outcome: no deployment target was available, but
/// the built artefact exists and its location is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeploymentResult {
    Deployed {
        url: DeploymentUrl,
        artifact_location: ArtifactLocation,
        /// Whether the URL answered within the reachability timeout.
        verified: bool,
    },
    Skipped {
        artifact_location: ArtifactLocation,
        reason: String,
    },
}

impl DeploymentResult {
    /// The deployed URL, when a deployment actually happened.
    pub fn url(&self) -> Option<&DeploymentUrl> {
        match self {
            Self::Deployed { url, .. } => Some(url),
            Self::Skipped { .. } => None,
        }
    }

    /// The artefact location, recorded for both outcomes.
    pub fn artifact_location(&self) -> &ArtifactLocation {
        match self {
            Self::Deployed {
                artifact_location, ..
            }
            | Self::Skipped {
                artifact_location, ..
            } => artifact_location,
        }
    }
}

// ---------------------------------------------------------------------------
// Status and error records
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    /// `Completed` and `Failed` are terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Classification of a recorded error.
///
/// Routers never inspect messages, only kinds: a fatal kind always sends the
/// workflow to `finalize` with failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself was rejected.
    InputValidation,
    /// The session's external-call budget is spent.
    CapabilityExhausted,
    /// An agent or deployment call failed; recoverable through self-heal.
    ExternalCall,
    /// Host memory or workflow capacity is critical.
    ResourceExhausted,
    /// The artefact failed validation; recoverable through self-heal.
    ValidationFailed,
    /// The self-heal ceiling was reached.
    RetryExhausted,
    /// A step reported a condition no retry can fix.
    Unrecoverable,
}

impl ErrorKind {
    /// Fatal kinds end the workflow at the next routing decision.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::InputValidation
                | Self::CapabilityExhausted
                | Self::ResourceExhausted
                | Self::Unrecoverable
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InputValidation => "input_validation",
            Self::CapabilityExhausted => "capability_exhausted",
            Self::ExternalCall => "external_call",
            Self::ResourceExhausted => "resource_exhausted",
            Self::ValidationFailed => "validation_failed",
            Self::RetryExhausted => "retry_exhausted",
            Self::Unrecoverable => "unrecoverable",
        };
        f.write_str(s)
    }
}

/// One entry in the append-only error history of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub step: Step,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: Timestamp,
    /// Value of `retry_count` when the error was recorded.
    pub retry_count: u32,
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

// ---------------------------------------------------------------------------
// Score types
// ---------------------------------------------------------------------------

/// Importance of an episodic memory entry in the range `[0.0, 1.0]`.
///
/// Recall ranks entries by importance before recency.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Importance(f64);

impl Importance {
    /// Entries at or above this level are shared across sessions as hints.
    pub const HINT_THRESHOLD: f64 = 0.7;

    /// `None` outside `[0.0, 1.0]` or for NaN.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Routine bookkeeping.
    pub fn low() -> Self {
        Self(0.2)
    }

    /// Ordinary step outcomes.
    pub fn normal() -> Self {
        Self(0.5)
    }

    /// Failures and lessons; shared with other sessions.
    pub fn high() -> Self {
        Self(0.9)
    }

    /// The score itself.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Importance {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("importance {value} is outside [0.0, 1.0]"))
    }
}

impl From<Importance> for f64 {
    fn from(importance: Importance) -> f64 {
        importance.0
    }
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Wall-clock time in UTC, serialised as RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wraps an existing UTC time.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// The wrapped UTC time.
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, clamped at zero.
    pub fn millis_since(self, earlier: Timestamp) -> u64 {
        let ms = (self.0 - earlier.0).num_milliseconds();
        u64::try_from(ms).unwrap_or(0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_requires_at_least_one_check() {
        assert!(!ValidationReport::default().passed());
        assert!(ValidationReport {
            checks_run: 4,
            failures: vec![]
        }
        .passed());
        assert!(!ValidationReport {
            checks_run: 4,
            failures: vec!["test_login failed".into()]
        }
        .passed());
    }

    #[test]
    fn importance_rejects_out_of_range_values() {
        assert!(Importance::new(-0.1).is_none());
        assert!(Importance::new(1.5).is_none());
        assert!(Importance::new(f64::NAN).is_none());
        assert_eq!(Importance::new(1.0).map(Importance::as_f64), Some(1.0));
        assert!(serde_json::from_str::<Importance>("1.5").is_err());
        assert_eq!(serde_json::from_str::<Importance>("0.7").unwrap().as_f64(), 0.7);
    }

    #[test]
    fn fatal_kinds_are_the_non_retryable_ones() {
        assert!(ErrorKind::CapabilityExhausted.is_fatal());
        assert!(ErrorKind::ResourceExhausted.is_fatal());
        assert!(!ErrorKind::ExternalCall.is_fatal());
        assert!(!ErrorKind::ValidationFailed.is_fatal());
        assert!(!ErrorKind::RetryExhausted.is_fatal());
    }

    #[test]
    fn deployment_result_serialises_with_outcome_tag() {
        let skipped = DeploymentResult::Skipped {
            artifact_location: ArtifactLocation::new("/tmp/out").unwrap(),
            reason: "no target".into(),
        };
        let json = serde_json::to_value(&skipped).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert!(skipped.url().is_none());
    }

    #[test]
    fn millis_since_clamps_negative_spans() {
        let later = Timestamp::now();
        let earlier = Timestamp::from_utc(later.as_datetime() - chrono::Duration::milliseconds(250));
        assert_eq!(later.millis_since(earlier), 250);
        assert_eq!(earlier.millis_since(later), 0);
    }
}
