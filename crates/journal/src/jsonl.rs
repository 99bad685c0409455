//! Append-only JSON-lines audit log.

use std::path::{Path, PathBuf};

use pipeline::{ArtifactOperation, AuditLog, SessionId, StepDecision};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::{AuditEntry, AuditRecord, JournalError, Lineage};

enum Command {
    Append(AuditRecord),
    Flush(oneshot::Sender<()>),
}

/// Writes one [`AuditRecord`] per line to a file.
///
/// Logging calls enqueue the record and return; a background task owns the
/// file and writes records in the order they were logged. Must be opened
/// inside a Tokio runtime.
pub struct JsonlAuditLog {
    path: PathBuf,
    lineage: Lineage,
    commands: mpsc::UnboundedSender<Command>,
}

impl JsonlAuditLog {
    /// Opens (creating if needed) `path` for appending.
    ///
    /// # Errors
    ///
    /// [`JournalError::Open`] when the file or its directory cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| JournalError::Open {
            path: path.clone(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(open_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(open_err)?;

        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(write_records(file, path.clone(), receiver));
        debug!(path = %path.display(), "Audit log opened");
        Ok(Self {
            path,
            lineage: Lineage::default(),
            commands,
        })
    }

    /// The file records are appended to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits until every record logged so far has been written.
    ///
    /// # Errors
    ///
    /// [`JournalError::WriterStopped`] if the background writer is gone.
    pub async fn flush(&self) -> Result<(), JournalError> {
        let (done, written) = oneshot::channel();
        self.commands
            .send(Command::Flush(done))
            .map_err(|_| JournalError::WriterStopped)?;
        written.await.map_err(|_| JournalError::WriterStopped)
    }

    fn append(&self, entry: AuditEntry) {
        let record = self.lineage.stamp(entry);
        if self.commands.send(Command::Append(record)).is_err() {
            warn!(path = %self.path.display(), "Audit writer has stopped; record dropped");
        }
    }
}

impl AuditLog for JsonlAuditLog {
    fn log_step_decision(&self, decision: StepDecision) {
        self.append(AuditEntry::StepDecision(decision));
    }

    fn log_artifact_operation(&self, operation: ArtifactOperation) {
        self.append(AuditEntry::ArtifactOperation(operation));
    }

    fn close_session(&self, session_id: &SessionId) {
        self.lineage.forget(session_id);
    }
}

async fn write_records(
    mut file: File,
    path: PathBuf,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Append(record) => {
                let mut line = match serde_json::to_vec(&record) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(record_id = %record.record_id, error = %e, "Unserialisable audit record");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = file.write_all(&line).await {
                    warn!(path = %path.display(), error = %e, "Audit write failed");
                }
            }
            Command::Flush(done) => {
                if let Err(e) = file.flush().await {
                    warn!(path = %path.display(), error = %e, "Audit flush failed");
                }
                let _ = done.send(());
            }
        }
    }
}
