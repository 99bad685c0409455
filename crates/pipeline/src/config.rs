//! Engine configuration.
//!
//! Every field has a default, so a configuration file only needs to name the
//! values it changes. The composition root loads the file, applies command-line
//! overrides, and calls [`EngineConfig::validate`] before anything is built.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BackoffSchedule, ShipyardError, MAX_RETRIES};

/// Step executions on the longest legal path: intake, plan, one
/// build/test/self-heal cycle per retry, then finalize.
pub const MIN_STEPS: u32 = 3 + 3 * MAX_RETRIES;

/// Limits and timings for the engine and its service boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Guarded agent calls admitted per session (retries included).
    pub session_call_budget: u32,
    /// First backoff delay for a transient agent failure.
    pub backoff_base_ms: u64,
    /// Transport-level retries per agent call.
    pub transport_retries: u32,
    /// How long the deploy step waits for a new URL to answer.
    pub deploy_poll_timeout_ms: u64,
    /// Pause between reachability checks.
    pub deploy_poll_interval_ms: u64,
    /// Episodic memory entries handed to an agent as context.
    pub memory_context_entries: usize,
    /// Longest accepted request, in characters.
    pub max_request_chars: usize,
    /// Workflows allowed in flight at once.
    pub max_concurrent_workflows: usize,
    /// Safety bound on step executions per workflow.
    pub max_steps: u32,
    /// Errors quoted in a failed result's message.
    pub error_summary_limit: usize,
    /// Minimum `MemAvailable` before new work is refused.
    pub min_available_memory_kib: u64,
    /// Longest `Retry-After` an agent may impose before the call is abandoned.
    pub max_retry_after_ms: u64,
    /// Finished results kept for `get_result`; older ones are evicted.
    pub retained_results: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_call_budget: 50,
            backoff_base_ms: 500,
            transport_retries: 3,
            deploy_poll_timeout_ms: 60_000,
            deploy_poll_interval_ms: 2_000,
            memory_context_entries: 5,
            max_request_chars: 10_000,
            max_concurrent_workflows: 8,
            max_steps: 64,
            error_summary_limit: 3,
            min_available_memory_kib: 256 * 1024,
            max_retry_after_ms: 60_000,
            retained_results: 1_000,
        }
    }
}

impl EngineConfig {
    /// # Errors
    ///
    /// [`ShipyardError::ConfigurationError`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), ShipyardError> {
        let nonzero: [(&str, u64); 7] = [
            ("session_call_budget", u64::from(self.session_call_budget)),
            ("max_request_chars", self.max_request_chars as u64),
            ("max_concurrent_workflows", self.max_concurrent_workflows as u64),
            ("max_steps", u64::from(self.max_steps)),
            ("error_summary_limit", self.error_summary_limit as u64),
            ("deploy_poll_interval_ms", self.deploy_poll_interval_ms),
            ("retained_results", self.retained_results as u64),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(ShipyardError::configuration(format!(
                "{name} must be greater than zero"
            )));
        }
        if self.max_steps < MIN_STEPS {
            return Err(ShipyardError::configuration(format!(
                "max_steps must be at least {MIN_STEPS} to fit a workflow that uses every retry"
            )));
        }
        if self.deploy_poll_interval_ms > self.deploy_poll_timeout_ms {
            return Err(ShipyardError::configuration(
                "deploy_poll_interval_ms must not exceed deploy_poll_timeout_ms",
            ));
        }
        // A full retry ladder must stay representable.
        if self.transport_retries > 0 {
            self.backoff()
                .delay(self.transport_retries - 1)
                .map_err(|e| ShipyardError::configuration(format!("backoff schedule: {e}")))?;
        }
        Ok(())
    }

    /// Checks a request before any workflow is created for it.
    ///
    /// # Errors
    ///
    /// [`ShipyardError::InputValidation`] for an empty or oversized request,
    /// or one containing control characters other than line breaks and tabs.
    pub fn check_request(&self, request_text: &str) -> Result<(), ShipyardError> {
        if request_text.trim().is_empty() {
            return Err(ShipyardError::invalid_input("request text must not be empty"));
        }
        let chars = request_text.chars().count();
        if chars > self.max_request_chars {
            return Err(ShipyardError::invalid_input(format!(
                "request text is {chars} characters; the limit is {}",
                self.max_request_chars
            )));
        }
        if request_text
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        {
            return Err(ShipyardError::invalid_input(
                "request text contains control characters",
            ));
        }
        Ok(())
    }

    /// Schedule for transient agent failures.
    pub fn backoff(&self) -> BackoffSchedule {
        BackoffSchedule::new(
            Duration::from_millis(self.backoff_base_ms),
            self.transport_retries,
        )
    }

    /// `max_retry_after_ms` as a duration.
    pub fn max_retry_after(&self) -> Duration {
        Duration::from_millis(self.max_retry_after_ms)
    }

    /// `deploy_poll_timeout_ms` as a duration.
    pub fn deploy_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.deploy_poll_timeout_ms)
    }

    /// `deploy_poll_interval_ms` as a duration.
    pub fn deploy_poll_interval(&self) -> Duration {
        Duration::from_millis(self.deploy_poll_interval_ms)
    }
}
