//! Deterministic exponential backoff for transient external-call failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A delay was requested outside the schedule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackoffError {
    /// A delay was requested for an attempt the schedule does not allow.
    #[error("attempt {attempt} is outside the schedule (max retries {max_retries})")]
    AttemptOutOfRange { attempt: u32, max_retries: u32 },

    /// `base_delay * 2^attempt` does not fit in a [`Duration`].
    #[error("delay for attempt {attempt} overflows")]
    Overflow { attempt: u32 },
}

/// `delay(attempt) = base_delay * 2^attempt` for `attempt` in `[0, max_retries)`.
///
/// Stateless; one schedule is shared by every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSchedule {
    base_delay: Duration,
    max_retries: u32,
}

impl BackoffSchedule {
    /// A schedule of `max_retries` doubling delays starting at `base_delay`.
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
        }
    }

    /// Delay before the first retry.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Number of retries the schedule covers.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether `attempt` (zero-based) is still within the schedule.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// The wait before retry number `attempt` (zero-based).
    ///
    /// # Errors
    ///
    /// - [`BackoffError::AttemptOutOfRange`] for `attempt >= max_retries`; the
    ///   schedule never clamps.
    /// - [`BackoffError::Overflow`] if the delay is not representable.
    pub fn delay(&self, attempt: u32) -> Result<Duration, BackoffError> {
        if !self.should_retry(attempt) {
            return Err(BackoffError::AttemptOutOfRange {
                attempt,
                max_retries: self.max_retries,
            });
        }
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .ok_or(BackoffError::Overflow { attempt })
    }
}
