//! Core orchestration domain for Shipyard.
//!
//! This crate contains every domain concept used by the pipeline: the workflow
//! state and its transitions, the fixed step graph and its routers, the session
//! rate limiter, the backoff schedule, and the port traits infrastructure
//! crates implement. Infrastructure crates never add domain rules.
//!
//! Nothing here performs I/O. Agents, audit storage, memory and host checks
//! are reached only through the traits in [`ports`].
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`SessionId`, `ArtifactLocation`, ...) |
//! | [`types`] | Value types (`Plan`, `ValidationReport`, `ErrorRecord`, ...) |
//! | [`state`] | `WorkflowState` and its transitions |
//! | [`routing`] | `Step`, routers, and the fixed graph edges |
//! | [`rate_limit`] | Per-session call budget |
//! | [`backoff`] | Exponential backoff schedule |
//! | [`config`] | `EngineConfig` |
//! | [`ports`] | Collaborator traits |
//! | [`outcome`] | `WorkflowOutcome` for the result boundary |
//! | [`errors`] | Boundary error and retry-policy types |

pub mod backoff;
pub mod config;
pub mod errors;
pub mod identifiers;
pub mod outcome;
pub mod ports;
pub mod rate_limit;
pub mod routing;
pub mod state;
pub mod types;

pub use backoff::{BackoffError, BackoffSchedule};
pub use config::{EngineConfig, MIN_STEPS};
pub use errors::{ResourceExhausted, RetryPolicy, ShipyardError};
pub use identifiers::{ArtifactLocation, BlankIdentifier, DeploymentUrl, SessionId};
pub use outcome::WorkflowOutcome;
pub use ports::{
    Agent, AgentRequest, AgentResponse, AgentRole, AgentTransportError, ArtifactOperation,
    AuditLog, EpisodicMemory, MemoryEntry, ProgressEvent, ProgressObserver, ProgressStatus,
    ReachabilityProbe, ResourceMonitor, StepDecision,
};
pub use rate_limit::{RateLimitExceeded, SessionRateLimiter};
pub use routing::{
    next_step, route_after_deploy, route_after_plan, route_after_self_heal, route_after_test,
    Edge, Router, Step, Verdict,
};
pub use state::{StateError, StateUpdate, WorkflowState, MAX_RETRIES};
pub use types::{
    DeploymentResult, ErrorKind, ErrorRecord, GeneratedArtifacts, Importance, Plan, PlanUnit,
    Timestamp, ValidationReport, WorkflowStatus,
};
