//! JSON-over-HTTP agent.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use pipeline::{Agent, AgentRequest, AgentResponse, AgentTransportError, RetryPolicy};
use reqwest::{header::RETRY_AFTER, Response, StatusCode, Url};
use tracing::debug;

use crate::AgentClientError;

/// Longest response body quoted in an error message.
const BODY_SNIPPET: usize = 200;

/// An agent reached by POSTing the request as JSON to a fixed endpoint.
///
/// | Answer | Classified as |
/// |--------|---------------|
/// | 2xx with an `AgentResponse` body | the response |
/// | 2xx with anything else | non-retryable |
/// | 429 | retryable, honouring `Retry-After` seconds |
/// | 5xx, timeout, connection failure | retryable |
/// | other 4xx | non-retryable |
#[derive(Debug, Clone)]
pub struct HttpAgent {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpAgent {
    /// # Errors
    ///
    /// [`AgentClientError`] for an unparsable endpoint or a client that
    /// cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, AgentClientError> {
        let endpoint = Url::parse(endpoint).map_err(|e| AgentClientError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, client })
    }

    /// The URL requests are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn classify(response: Response) -> Result<AgentResponse, AgentTransportError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<AgentResponse>().await.map_err(|e| {
                AgentTransportError::permanent(format!("malformed agent response: {e}"))
            });
        }

        let after = retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(BODY_SNIPPET).collect();
        let message = format!("agent answered {status}: {snippet}");

        if status == StatusCode::TOO_MANY_REQUESTS {
            Err(AgentTransportError {
                message,
                retry: RetryPolicy::Retryable { after },
            })
        } else if status.is_server_error() {
            Err(AgentTransportError::retryable(message))
        } else {
            Err(AgentTransportError::permanent(message))
        }
    }
}

#[async_trait]
impl Agent for HttpAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentTransportError> {
        let started = Instant::now();
        let role = request.role;
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let message = format!("request to {role} agent failed: {e}");
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    AgentTransportError::retryable(message)
                } else {
                    AgentTransportError::permanent(message)
                }
            })?;
        debug!(
            role = %role,
            status = response.status().as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Agent answered"
        );
        Self::classify(response).await
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{AgentRole, SessionId};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> AgentRequest {
        AgentRequest {
            role: AgentRole::Builder,
            session_id: SessionId::new("http-1").unwrap(),
            input: json!({ "plan": { "units": [] } }),
            context: None,
        }
    }

    async fn agent_for(server: &MockServer) -> HttpAgent {
        HttpAgent::new(&format!("{}/invoke", server.uri()), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn posts_the_request_and_reads_the_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoke"))
            .and(body_partial_json(json!({ "role": "builder", "session_id": "http-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "payload": { "artifact_location": "/tmp/out" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = agent_for(&server).await.invoke(request()).await.unwrap();
        assert!(response.success);
        assert_eq!(response.payload.unwrap()["artifact_location"], "/tmp/out");
    }

    #[tokio::test]
    async fn reported_failure_is_a_response_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "errors": ["cannot build"]
            })))
            .mount(&server)
            .await;

        let response = agent_for(&server).await.invoke(request()).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.errors, ["cannot build"]);
    }

    #[tokio::test]
    async fn too_many_requests_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = agent_for(&server).await.invoke(request()).await.unwrap_err();
        assert_eq!(
            err.retry,
            RetryPolicy::Retryable {
                after: Some(Duration::from_secs(7))
            }
        );
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = agent_for(&server).await.invoke(request()).await.unwrap_err();
        assert!(err.retry.is_retryable());
        assert!(err.message.contains("503"));
        assert!(err.message.contains("overloaded"));
    }

    #[tokio::test]
    async fn client_errors_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .mount(&server)
            .await;

        let err = agent_for(&server).await.invoke(request()).await.unwrap_err();
        assert_eq!(err.retry, RetryPolicy::NonRetryable);
    }

    #[tokio::test]
    async fn malformed_body_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = agent_for(&server).await.invoke(request()).await.unwrap_err();
        assert_eq!(err.retry, RetryPolicy::NonRetryable);
        assert!(err.message.contains("malformed"));
    }

    #[tokio::test]
    async fn timeouts_are_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let agent =
            HttpAgent::new(&format!("{}/invoke", server.uri()), Duration::from_millis(100)).unwrap();
        let err = agent.invoke(request()).await.unwrap_err();
        assert!(err.retry.is_retryable());
    }

    #[test]
    fn rejects_unparsable_endpoints() {
        assert!(matches!(
            HttpAgent::new("not a url", Duration::from_secs(1)),
            Err(AgentClientError::InvalidEndpoint { .. })
        ));
    }
}
