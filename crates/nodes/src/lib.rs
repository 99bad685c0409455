//! Shipyard step functions, agent gateway, graph executor and service.
//!
//! This crate provides the seven step functions (Intake through Finalize),
//! the [`AgentGateway`] that wraps every agent call with the session rate
//! limit and transport backoff, the [`PipelineExecutor`] that drives the
//! step graph, and the [`WorkflowService`] request/result boundary.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Steps sequence calls between the domain rules in
//! the [`pipeline`] crate and the collaborator ports (agents, audit log,
//! episodic memory, resource monitor). They contain no domain rules of their
//! own: what runs next is always decided by [`pipeline::next_step`].

pub mod context;
pub mod executor;
pub mod gateway;
pub mod progress;
pub mod resources;
pub mod service;
pub mod steps;

pub use context::NodeContext;
pub use executor::{EngineError, PipelineExecutor};
pub use gateway::{AgentCallError, AgentGateway, AgentRegistry};
pub use progress::{ProgressEmitter, ProgressHub, SessionProgress};
pub use resources::MemInfoMonitor;
pub use service::WorkflowService;
