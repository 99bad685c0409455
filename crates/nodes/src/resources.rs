//! Host memory check used before expensive steps and at admission.

use std::path::PathBuf;

use pipeline::{ResourceExhausted, ResourceMonitor};
use tracing::debug;

/// Refuses work while `MemAvailable` in `/proc/meminfo` is below a floor.
///
/// Hosts without a readable meminfo file are treated as healthy.
#[derive(Debug, Clone)]
pub struct MemInfoMonitor {
    path: PathBuf,
    min_available_kib: u64,
}

impl MemInfoMonitor {
    /// Where the host reports memory on Linux.
    pub const DEFAULT_PATH: &'static str = "/proc/meminfo";

    /// Reads [`DEFAULT_PATH`](Self::DEFAULT_PATH). A minimum of 0 disables the check.
    pub fn new(min_available_kib: u64) -> Self {
        Self::with_path(Self::DEFAULT_PATH, min_available_kib)
    }

    /// Reads a `meminfo`-formatted file at `path`.
    pub fn with_path(path: impl Into<PathBuf>, min_available_kib: u64) -> Self {
        Self {
            path: path.into(),
            min_available_kib,
        }
    }
}

impl ResourceMonitor for MemInfoMonitor {
    fn check(&self) -> Result<(), ResourceExhausted> {
        if self.min_available_kib == 0 {
            return Ok(());
        }
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "meminfo unreadable; skipping check");
                return Ok(());
            }
        };
        match parse_mem_available(&contents) {
            Some(available) if available < self.min_available_kib => Err(ResourceExhausted {
                resource: "memory".to_string(),
                detail: format!(
                    "{available} KiB available, {} KiB required",
                    self.min_available_kib
                ),
            }),
            _ => Ok(()),
        }
    }
}

/// Extracts the `MemAvailable` figure (in KiB).
pub fn parse_mem_available(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemAvailable:")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}
