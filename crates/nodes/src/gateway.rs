//! Rate-limited, retrying access to the content-generation agents.
//!
//! Every agent call made by a step goes through [`AgentGateway::call`]:
//!
//! 1. The session's call budget is checked and charged. An exhausted budget
//!    fails immediately with [`AgentCallError::RateLimited`] and is never
//!    retried here.
//! 2. The agent is invoked. A well-formed failure report is returned as
//!    [`AgentCallError::Rejected`]; recovering from it is the self-heal
//!    cycle's job, not the gateway's.
//! 3. A retryable transport failure is retried on the [`BackoffSchedule`],
//!    waiting at least as long as the adapter's `Retry-After` hint. Each
//!    retry is charged against the budget again. A hint longer than
//!    [`AgentGateway::with_max_retry_after`] allows ends the call instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pipeline::{
    Agent, AgentRequest, AgentRole, BackoffSchedule, ErrorKind, RateLimitExceeded, RetryPolicy,
    SessionId, SessionRateLimiter,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// The agents available to the pipeline, one per role.
///
/// The deployer is optional: without one, the deploy step records a skipped
/// deployment instead of failing.
#[derive(Clone)]
pub struct AgentRegistry {
    planner: Arc<dyn Agent>,
    builder: Arc<dyn Agent>,
    tester: Arc<dyn Agent>,
    deployer: Option<Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// A registry without a deployer.
    pub fn new(planner: Arc<dyn Agent>, builder: Arc<dyn Agent>, tester: Arc<dyn Agent>) -> Self {
        Self {
            planner,
            builder,
            tester,
            deployer: None,
        }
    }

    /// Adds the optional deployer.
    pub fn with_deployer(mut self, deployer: Arc<dyn Agent>) -> Self {
        self.deployer = Some(deployer);
        self
    }

    /// The agent serving `role`, if any.
    pub fn get(&self, role: AgentRole) -> Option<&Arc<dyn Agent>> {
        match role {
            AgentRole::Planner => Some(&self.planner),
            AgentRole::Builder => Some(&self.builder),
            AgentRole::Tester => Some(&self.tester),
            AgentRole::Deployer => self.deployer.as_ref(),
        }
    }
}

/// Why an agent call produced no usable payload.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AgentCallError {
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error("{role} agent reported failure: {}", .errors.join("; "))]
    Rejected { role: AgentRole, errors: Vec<String> },

    #[error("{role} agent failed after {attempts} attempt(s): {message}")]
    Transport {
        role: AgentRole,
        attempts: u32,
        message: String,
    },

    #[error("{role} agent returned a malformed payload: {reason}")]
    MalformedPayload { role: AgentRole, reason: String },

    #[error("no {role} agent is configured")]
    Unavailable { role: AgentRole },
}

impl AgentCallError {
    /// How a step should classify this failure in the error history.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited(_) => ErrorKind::CapabilityExhausted,
            Self::Rejected { .. }
            | Self::Transport { .. }
            | Self::MalformedPayload { .. }
            | Self::Unavailable { .. } => ErrorKind::ExternalCall,
        }
    }

    fn rejected(role: AgentRole, mut errors: Vec<String>) -> Self {
        if errors.is_empty() {
            errors.push("no reason given".to_string());
        }
        Self::Rejected { role, errors }
    }
}

/// Charges, invokes and retries agent calls on behalf of the steps.
pub struct AgentGateway {
    agents: AgentRegistry,
    limiter: Arc<SessionRateLimiter>,
    backoff: BackoffSchedule,
    max_retry_after: Duration,
}

impl AgentGateway {
    /// Longest server-requested wait honoured unless configured otherwise.
    pub const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

    /// Retry-After hints are capped at [`DEFAULT_MAX_RETRY_AFTER`](Self::DEFAULT_MAX_RETRY_AFTER).
    pub fn new(
        agents: AgentRegistry,
        limiter: Arc<SessionRateLimiter>,
        backoff: BackoffSchedule,
    ) -> Self {
        Self {
            agents,
            limiter,
            backoff,
            max_retry_after: Self::DEFAULT_MAX_RETRY_AFTER,
        }
    }

    /// Caps how long a `Retry-After` hint may hold a workflow. A longer hint
    /// fails the call with [`AgentCallError::Transport`] without waiting.
    pub fn with_max_retry_after(mut self, limit: Duration) -> Self {
        self.max_retry_after = limit;
        self
    }

    /// Whether an agent is registered for `role`.
    pub fn has_agent(&self, role: AgentRole) -> bool {
        self.agents.get(role).is_some()
    }

    /// The call budget shared by every workflow using this gateway.
    pub fn limiter(&self) -> &SessionRateLimiter {
        &self.limiter
    }

    /// Invokes the agent for `role` and returns its payload
    /// (`Value::Null` when a successful response carried none).
    ///
    /// # Errors
    ///
    /// See [`AgentCallError`]; a rate-limit rejection is returned before the
    /// agent is contacted.
    pub async fn call(
        &self,
        role: AgentRole,
        session_id: &SessionId,
        input: Value,
        context: Option<String>,
    ) -> Result<Value, AgentCallError> {
        let agent = self
            .agents
            .get(role)
            .ok_or(AgentCallError::Unavailable { role })?;
        let request = AgentRequest {
            role,
            session_id: session_id.clone(),
            input,
            context,
        };

        let mut attempt: u32 = 0;
        loop {
            let remaining = self.limiter.check_and_increment(session_id)?;
            let started = Instant::now();
            let outcome = agent.invoke(request.clone()).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let error = match outcome {
                Ok(response) if response.success => {
                    debug!(
                        session_id = %session_id,
                        role = %role,
                        attempt,
                        remaining,
                        duration_ms,
                        "Agent call succeeded"
                    );
                    return Ok(response.payload.unwrap_or(Value::Null));
                }
                Ok(response) => return Err(AgentCallError::rejected(role, response.errors)),
                Err(error) => error,
            };

            let transport = |message: String| AgentCallError::Transport {
                role,
                attempts: attempt + 1,
                message,
            };
            if !error.retry.is_retryable() || !self.backoff.should_retry(attempt) {
                return Err(transport(error.message));
            }
            let hint = match error.retry {
                RetryPolicy::Retryable { after } => after,
                RetryPolicy::NonRetryable => None,
            };
            if let Some(hint) = hint.filter(|h| *h > self.max_retry_after) {
                warn!(
                    session_id = %session_id,
                    role = %role,
                    retry_after_secs = hint.as_secs(),
                    limit_secs = self.max_retry_after.as_secs(),
                    "Agent asked for a longer wait than allowed; giving up"
                );
                return Err(transport(format!(
                    "{}; agent asked to wait {}s, the limit is {}s",
                    error.message,
                    hint.as_secs(),
                    self.max_retry_after.as_secs()
                )));
            }
            let scheduled = self
                .backoff
                .delay(attempt)
                .map_err(|e| transport(format!("{}; {e}", error.message)))?;
            let delay = hint.map_or(scheduled, |hint| hint.max(scheduled));

            warn!(
                session_id = %session_id,
                role = %role,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error.message,
                "Transient agent failure; backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Like [`call`](Self::call), decoding the payload into `T`.
    ///
    /// # Errors
    ///
    /// [`AgentCallError::MalformedPayload`] when the payload does not decode.
    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        role: AgentRole,
        session_id: &SessionId,
        input: Value,
        context: Option<String>,
    ) -> Result<T, AgentCallError> {
        let payload = self.call(role, session_id, input, context).await?;
        serde_json::from_value(payload).map_err(|e| AgentCallError::MalformedPayload {
            role,
            reason: e.to_string(),
        })
    }
}
