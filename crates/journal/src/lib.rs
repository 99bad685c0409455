//! Shipyard audit log and episodic memory adapters.
//!
//! | Type | Implements | Storage |
//! |------|------------|---------|
//! | [`JsonlAuditLog`] | [`pipeline::AuditLog`] | append-only JSON-lines file |
//! | [`TracingAuditLog`] | [`pipeline::AuditLog`] | structured `tracing` events |
//! | [`InMemoryEpisodicMemory`] | [`pipeline::EpisodicMemory`] | process memory |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Every write is fire-and-forget: callers hand a record
//! over and return immediately. Storage failures are logged, never surfaced
//! to the pipeline.

pub mod error;
pub mod jsonl;
pub mod memory;
pub mod record;
pub mod tracing_log;

pub use error::JournalError;
pub use jsonl::JsonlAuditLog;
pub use memory::InMemoryEpisodicMemory;
pub use record::{AuditEntry, AuditRecord, Lineage};
pub use tracing_log::TracingAuditLog;
