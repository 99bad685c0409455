//! Shipyard agent infrastructure adapter.
//!
//! Implements [`pipeline::Agent`] over HTTP: each agent is a service that
//! accepts a JSON [`pipeline::AgentRequest`] and answers with a JSON
//! [`pipeline::AgentResponse`]. Also provides the HTTP
//! [`pipeline::ReachabilityProbe`] used to verify deployments.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, status mapping and `Retry-After`
//! parsing live here. Retrying itself is the gateway's job in the `nodes`
//! crate; this crate only classifies failures as retryable or not.

pub mod error;
pub mod http;
pub mod probe;

pub use error::AgentClientError;
pub use http::HttpAgent;
pub use probe::HttpReachabilityProbe;
