//! The audit record format shared by every audit sink.

use std::collections::HashMap;

use parking_lot::Mutex;
use pipeline::{ArtifactOperation, SessionId, StepDecision, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an audit record is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    StepDecision(StepDecision),
    ArtifactOperation(ArtifactOperation),
}

impl AuditEntry {
    /// The session the entry belongs to.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::StepDecision(d) => &d.session_id,
            Self::ArtifactOperation(o) => &o.session_id,
        }
    }
}

/// One line of the audit trail.
///
/// `parent_id` links to the previous record of the same session, so a
/// session's history can be walked backwards even when sessions interleave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub entry: AuditEntry,
}

/// Hands out record ids and remembers the latest one per session.
#[derive(Debug, Default)]
pub struct Lineage {
    last: Mutex<HashMap<SessionId, Uuid>>,
}

impl Lineage {
    /// Stamps `entry` with a fresh id chained to the session's previous record.
    pub fn stamp(&self, entry: AuditEntry) -> AuditRecord {
        let record_id = Uuid::new_v4();
        let parent_id = self
            .last
            .lock()
            .insert(entry.session_id().clone(), record_id);
        AuditRecord {
            record_id,
            parent_id,
            timestamp: Timestamp::now(),
            entry,
        }
    }

    /// Forgets the session's latest record; its next record starts a new chain.
    pub fn forget(&self, session_id: &SessionId) {
        self.last.lock().remove(session_id);
    }
}
