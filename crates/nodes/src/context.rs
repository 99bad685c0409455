//! Collaborators shared by every step function.

use std::sync::Arc;
use std::time::Duration;

use pipeline::{
    ArtifactOperation, AuditLog, EngineConfig, EpisodicMemory, Importance, MemoryEntry,
    ReachabilityProbe, ResourceMonitor, StepDecision, Step, WorkflowState,
};
use serde_json::Value;

use crate::AgentGateway;

/// Everything a step needs besides the state it transforms.
///
/// Built once by the composition root and shared (behind an `Arc`) by all
/// workflows the service runs.
pub struct NodeContext {
    pub gateway: AgentGateway,
    pub audit: Arc<dyn AuditLog>,
    pub memory: Arc<dyn EpisodicMemory>,
    pub resources: Arc<dyn ResourceMonitor>,
    pub reachability: Arc<dyn ReachabilityProbe>,
    pub config: EngineConfig,
}

impl NodeContext {
    /// Bundles the collaborators every step may use.
    pub fn new(
        gateway: AgentGateway,
        audit: Arc<dyn AuditLog>,
        memory: Arc<dyn EpisodicMemory>,
        resources: Arc<dyn ResourceMonitor>,
        reachability: Arc<dyn ReachabilityProbe>,
        config: EngineConfig,
    ) -> Self {
        Self {
            gateway,
            audit,
            memory,
            resources,
            reachability,
            config,
        }
    }

    pub(crate) fn decision(
        &self,
        state: &WorkflowState,
        step: Step,
        action: &str,
        details: Value,
        took: Duration,
    ) {
        self.audit.log_step_decision(StepDecision {
            session_id: state.session_id().clone(),
            step: step.name().to_string(),
            action: action.to_string(),
            details,
            duration_ms: took.as_millis() as u64,
        });
    }

    pub(crate) fn artifact(
        &self,
        state: &WorkflowState,
        step: Step,
        operation: &str,
        path: &str,
        reason: String,
    ) {
        self.audit.log_artifact_operation(ArtifactOperation {
            session_id: state.session_id().clone(),
            step: step.name().to_string(),
            operation: operation.to_string(),
            path: path.to_string(),
            reason,
        });
    }

    pub(crate) fn remember(
        &self,
        state: &WorkflowState,
        step: Step,
        action: &str,
        data: Value,
        importance: Importance,
    ) {
        self.memory.add_entry(MemoryEntry {
            session_id: state.session_id().clone(),
            step: step.name().to_string(),
            action: action.to_string(),
            data,
            tags: vec![step.name().to_string(), action.to_string()],
            importance,
        });
    }

    pub(crate) async fn recall(&self, state: &WorkflowState, step: Step) -> Option<String> {
        self.memory
            .get_context(
                state.session_id(),
                step.name(),
                self.config.memory_context_entries,
            )
            .await
    }
}
