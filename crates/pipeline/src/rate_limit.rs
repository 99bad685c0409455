//! Per-session call budget for expensive external capabilities.
//!
//! The limiter is the only piece of state shared between concurrently running
//! workflows. Each session has one record (a call counter and the time of the
//! last admitted call), and every read or write of that record happens under a
//! single lock, so `check_and_increment`, `remaining` and `reset` for the same
//! session are totally ordered.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

use crate::{SessionId, Timestamp};

/// The session has spent its call budget.
///
/// Callers must not perform the guarded call and must surface this as a
/// capability-exhaustion condition rather than a generic failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("rate limit exceeded for session {session_id}: budget of {budget} calls spent")]
pub struct RateLimitExceeded {
    pub session_id: SessionId,
    pub budget: u32,
}

#[derive(Debug, Clone, Copy)]
struct CallRecord {
    calls: u32,
    last_call_at: Timestamp,
}

/// Admits at most `budget` guarded calls per session.
#[derive(Debug)]
pub struct SessionRateLimiter {
    budget: u32,
    records: Mutex<HashMap<SessionId, CallRecord>>,
}

impl SessionRateLimiter {
    /// Admits `budget` calls per session.
    pub fn new(budget: u32) -> Self {
        Self {
            budget,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Calls each session may make.
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Admits one call for `session_id` if budget remains.
    ///
    /// Returns the number of calls still available after this one.
    ///
    /// # Errors
    ///
    /// [`RateLimitExceeded`] when the budget is already spent. The counter is
    /// not advanced for a rejected call.
    pub fn check_and_increment(&self, session_id: &SessionId) -> Result<u32, RateLimitExceeded> {
        let mut records = self.records.lock();
        let used = records.get(session_id).map_or(0, |r| r.calls);
        if used >= self.budget {
            tracing::warn!(
                session_id = %session_id,
                budget = self.budget,
                "Session call budget exhausted"
            );
            return Err(RateLimitExceeded {
                session_id: session_id.clone(),
                budget: self.budget,
            });
        }
        records.insert(
            session_id.clone(),
            CallRecord {
                calls: used + 1,
                last_call_at: Timestamp::now(),
            },
        );
        Ok(self.budget - (used + 1))
    }

    /// Calls still available to `session_id`.
    pub fn remaining(&self, session_id: &SessionId) -> u32 {
        let records = self.records.lock();
        let used = records.get(session_id).map_or(0, |r| r.calls);
        self.budget.saturating_sub(used)
    }

    /// When the last admitted call for `session_id` happened.
    pub fn last_call_at(&self, session_id: &SessionId) -> Option<Timestamp> {
        self.records.lock().get(session_id).map(|r| r.last_call_at)
    }

    /// Restores the full budget for `session_id`.
    pub fn reset(&self, session_id: &SessionId) {
        if self.records.lock().remove(session_id).is_some() {
            tracing::info!(session_id = %session_id, "Session call budget reset");
        }
    }
}
