//! Structured failure reports written by actions.
//!
//! A failing action may write a short reason code to
//! [`FAILURE_REASON_PATH`] and a free-text message to
//! [`FAILURE_MESSAGE_PATH`]. Both live under `/tinkerbell`, which is a bind
//! mount of a per-attempt host directory (see [`report_dir`]), so the
//! runtime reads them on the host after the task exits.
//!
//! Missing files are normal. Files are read up to `max_file_size` bytes.

use crate::action::FailureInfo;
use crate::constants::{
    FAILURE_MESSAGE_PATH, FAILURE_REASON_PATH, GENERIC_FAILURE_MESSAGE, GENERIC_FAILURE_REASON,
    REPORT_DIR, REPORT_MOUNT_DESTINATION,
};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Returns the host directory mounted at `/tinkerbell` for one attempt.
pub fn report_dir(data_dir: &Path, workflow_id: &str, container_id: &str) -> PathBuf {
    data_dir.join(workflow_id).join(REPORT_DIR).join(container_id)
}

/// What an action left behind in its report directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureReport {
    /// Contents of `failure-reason`, trimmed.
    pub reason: Option<String>,
    /// Contents of `failure-message`, trimmed.
    pub message: Option<String>,
}

impl FailureReport {
    /// Fills in generic values for whatever the action did not report.
    pub fn into_failure_info(self) -> FailureInfo {
        FailureInfo {
            reason: self
                .reason
                .unwrap_or_else(|| GENERIC_FAILURE_REASON.to_string()),
            message: self
                .message
                .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
        }
    }
}

/// Reads failure files from report directories.
#[derive(Debug, Clone, Copy)]
pub struct FailureReasonReader {
    max_file_size: u64,
}

impl FailureReasonReader {
    /// Creates a reader that reads at most `max_file_size` bytes per file.
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    /// Reads both files from `report_dir`. Never fails; unreadable files
    /// are logged and treated as absent.
    pub async fn read(&self, report_dir: &Path) -> FailureReport {
        FailureReport {
            reason: self.read_file(&host_path(report_dir, FAILURE_REASON_PATH)).await,
            message: self.read_file(&host_path(report_dir, FAILURE_MESSAGE_PATH)).await,
        }
    }

    async fn read_file(&self, path: &Path) -> Option<String> {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No failure file at {}", path.display());
                return None;
            }
            Err(e) => {
                warn!("Cannot open {}: {}", path.display(), e);
                return None;
            }
        };

        let mut data = Vec::new();
        if let Err(e) = file.take(self.max_file_size).read_to_end(&mut data).await {
            warn!("Cannot read {}: {}", path.display(), e);
            return None;
        }
        if data.len() as u64 == self.max_file_size {
            warn!(
                "{} reached the {} byte limit and may be truncated",
                path.display(),
                self.max_file_size
            );
        }

        let text = String::from_utf8_lossy(&data).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Maps an in-container path under `/tinkerbell` onto `report_dir`.
fn host_path(report_dir: &Path, container_path: &str) -> PathBuf {
    match Path::new(container_path).strip_prefix(REPORT_MOUNT_DESTINATION) {
        Ok(relative) => report_dir.join(relative),
        Err(_) => report_dir.join(Path::new(container_path).file_name().unwrap_or_default()),
    }
}
