use thiserror::Error;

/// An HTTP adapter could not be constructed.
#[derive(Debug, Error)]
pub enum AgentClientError {
    #[error("invalid agent endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
