use std::path::PathBuf;

use thiserror::Error;

/// Failures of the audit journal itself.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("cannot open audit log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit writer has stopped")]
    WriterStopped,
}
