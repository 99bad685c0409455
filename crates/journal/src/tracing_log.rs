//! Audit sink for runs without an audit file.

use pipeline::{ArtifactOperation, AuditLog, SessionId, StepDecision};
use tracing::info;

use crate::{AuditEntry, Lineage};

/// Emits audit records as structured `tracing` events on the
/// `shipyard::audit` target. Used when no audit file is configured.
#[derive(Debug, Default)]
pub struct TracingAuditLog {
    lineage: Lineage,
}

impl TracingAuditLog {
    /// A sink with an empty lineage table.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditLog for TracingAuditLog {
    fn log_step_decision(&self, decision: StepDecision) {
        let record = self.lineage.stamp(AuditEntry::StepDecision(decision));
        if let AuditEntry::StepDecision(d) = &record.entry {
            info!(
                target: "shipyard::audit",
                record_id = %record.record_id,
                parent_id = ?record.parent_id,
                session_id = %d.session_id,
                step = %d.step,
                action = %d.action,
                duration_ms = d.duration_ms,
                details = %d.details,
                "Step decision"
            );
        }
    }

    fn log_artifact_operation(&self, operation: ArtifactOperation) {
        let record = self
            .lineage
            .stamp(AuditEntry::ArtifactOperation(operation));
        if let AuditEntry::ArtifactOperation(o) = &record.entry {
            info!(
                target: "shipyard::audit",
                record_id = %record.record_id,
                parent_id = ?record.parent_id,
                session_id = %o.session_id,
                step = %o.step,
                operation = %o.operation,
                path = %o.path,
                reason = %o.reason,
                "Artifact operation"
            );
        }
    }

    fn close_session(&self, session_id: &SessionId) {
        self.lineage.forget(session_id);
    }
}
