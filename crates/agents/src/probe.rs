//! Checks that a freshly deployed URL answers over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{DeploymentUrl, ReachabilityProbe};
use tracing::debug;

use crate::AgentClientError;

/// Treats a URL as reachable when a GET ends in a 2xx or 3xx answer.
#[derive(Debug, Clone)]
pub struct HttpReachabilityProbe {
    client: reqwest::Client,
}

impl HttpReachabilityProbe {
    /// `timeout` bounds each individual probe.
    pub fn new(timeout: Duration) -> Result<Self, AgentClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProbe {
    async fn is_reachable(&self, url: &DeploymentUrl) -> bool {
        match self.client.get(url.as_str()).send().await {
            Ok(response) => {
                let status = response.status();
                debug!(url = %url, status = status.as_u16(), "Probed deployment");
                status.is_success() || status.is_redirection()
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Deployment not reachable yet");
                false
            }
        }
    }
}
