//! Top-level error and retry-policy types for the Shipyard pipeline domain.
//!
//! [`ShipyardError`] covers conditions surfaced at the request/result boundary:
//! a workflow that cannot be started, or a configuration that cannot be used.
//! Errors that happen *inside* a running workflow never escape as Rust errors;
//! step functions convert them into [`crate::ErrorRecord`] entries on the state.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any infrastructure error that
//! participates in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::SessionId;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// How the agent gateway should treat a failed call.
///
/// Transport failures, 5xx and 429 are retried on the backoff schedule.
/// Malformed bodies and other 4xx responses are not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Server-requested delay; the gateway waits at least this long.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Boundary errors
// ---------------------------------------------------------------------------

/// Errors returned by the request/result boundary and at configuration time.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShipyardError {
    /// The request was rejected before a workflow was created. The caller
    /// must fix the input; retrying the same request fails the same way.
    #[error("Invalid request: {reason}")]
    InputValidation {
        /// Why the request was rejected.
        reason: String,
    },

    /// Host resources are critical; no workflow is started.
    #[error("Resource exhausted ({resource}): {detail}")]
    ResourceExhausted {
        /// The resource that is exhausted (e.g. `"memory"`, `"workflow slots"`).
        resource: String,
        /// Human-readable detail.
        detail: String,
    },

    /// A workflow with this session id is still in flight.
    #[error("Session {session_id} already has a running workflow")]
    SessionActive {
        /// The conflicting session.
        session_id: SessionId,
    },

    /// The engine configuration is invalid.
    ///
    /// Produced at load time; the service never starts with an invalid config.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },
}

impl ShipyardError {
    /// Shorthand for [`ShipyardError::InputValidation`].
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InputValidation {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ShipyardError::ConfigurationError`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }
}

/// A resource monitor's report that the host cannot take more work.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{resource} exhausted: {detail}")]
pub struct ResourceExhausted {
    pub resource: String,
    pub detail: String,
}

impl From<ResourceExhausted> for ShipyardError {
    fn from(e: ResourceExhausted) -> Self {
        Self::ResourceExhausted {
            resource: e.resource,
            detail: e.detail,
        }
    }
}
