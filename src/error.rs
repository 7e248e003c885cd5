//! Error types for the action runtime.

use std::path::PathBuf;

/// Result type alias for action runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while launching, waiting on, or removing action
/// containers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Container Lifecycle Errors
    // =========================================================================
    /// Container not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Container already exists.
    #[error("container already exists: {0}")]
    ContainerAlreadyExists(String),

    /// Invalid container ID format.
    #[error("invalid container ID '{id}': {reason}")]
    InvalidContainerId { id: String, reason: String },

    /// Container create failed.
    #[error("failed to create container '{id}': {reason}")]
    CreateFailed { id: String, reason: String },

    /// Container delete failed.
    #[error("failed to delete container '{id}': {reason}")]
    DeleteFailed { id: String, reason: String },

    // =========================================================================
    // Task Errors
    // =========================================================================
    /// The container has no task (never started, or already deleted).
    #[error("no task for container: {0}")]
    TaskNotFound(String),

    /// Task create failed.
    #[error("failed to create task for '{id}': {reason}")]
    TaskCreateFailed { id: String, reason: String },

    /// Task start failed.
    #[error("failed to start task for '{id}': {reason}")]
    StartFailed { id: String, reason: String },

    /// Signal delivery failed.
    #[error("failed to send signal to container '{id}': {reason}")]
    SignalFailed { id: String, reason: String },

    /// Waiting on the task exit status failed.
    #[error("failed to wait on task for '{id}': {reason}")]
    WaitFailed { id: String, reason: String },

    // =========================================================================
    // Image/Registry Errors
    // =========================================================================
    /// Failed to parse image reference.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    /// Image pull failed.
    #[error("failed to pull image '{reference}': {reason}")]
    ImagePullFailed { reference: String, reason: String },

    /// Image is not in the local image index.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Image config blob could not be decoded.
    #[error("invalid image config for '{reference}': {reason}")]
    InvalidImageConfig { reference: String, reason: String },

    /// Layer extraction failed.
    #[error("failed to extract layer {digest}: {reason}")]
    LayerExtractionFailed { digest: String, reason: String },

    /// Image size exceeded limits.
    #[error("image exceeds size limit: {size} > {limit} bytes")]
    ImageTooLarge { size: u64, limit: u64 },

    /// Path traversal attempt detected in tar archive.
    #[error("path traversal detected in layer: {path}")]
    PathTraversal { path: String },

    // =========================================================================
    // Snapshot/Bundle Errors
    // =========================================================================
    /// A snapshot with this key is already present.
    #[error("snapshot already exists: {0}")]
    SnapshotExists(String),

    /// Snapshot not found.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Snapshot preparation or removal failed.
    #[error("snapshot '{key}' failed: {reason}")]
    SnapshotFailed { key: String, reason: String },

    /// OCI spec generation failed.
    #[error("failed to generate OCI spec: {0}")]
    SpecGenerationFailed(String),

    /// A declared action volume could not be parsed.
    #[error("invalid volume '{volume}': {reason}")]
    InvalidVolume { volume: String, reason: String },

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Container engine not available on this platform.
    #[error("container engine '{engine}' not available: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    /// Launch retries were exhausted.
    #[error("action '{action}' failed to launch after {attempts} attempts: {reason}")]
    RetriesExhausted {
        action: String,
        attempts: u32,
        reason: String,
    },

    // =========================================================================
    // Context Errors
    // =========================================================================
    /// The caller's context was cancelled.
    #[error("context canceled")]
    Canceled,

    /// The caller's context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Storage initialization failed.
    #[error("failed to initialize storage at {path}: {reason}")]
    StorageInitFailed { path: PathBuf, reason: String },

    /// Blob not found in storage.
    #[error("blob not found: {digest}")]
    BlobNotFound { digest: String },

    /// Storage write failed.
    #[error("failed to write to storage: {0}")]
    StorageWriteFailed(String),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true when the error means the object is already gone.
    ///
    /// Cleanup paths treat these as the desired end state.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ContainerNotFound(_)
                | Self::TaskNotFound(_)
                | Self::ImageNotFound(_)
                | Self::SnapshotNotFound(_)
                | Self::BlobNotFound { .. }
        ) || matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Returns true for transport/engine errors a later attempt may not hit.
    ///
    /// Malformed input (bad references, bad volume specs) is not retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidImageReference { .. }
                | Self::InvalidVolume { .. }
                | Self::InvalidContainerId { .. }
                | Self::PathTraversal { .. }
                | Self::ImageTooLarge { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(Error::ContainerNotFound("a".into()).is_not_found());
        assert!(Error::TaskNotFound("a".into()).is_not_found());
        assert!(Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).is_not_found());
        assert!(
            !Error::DeleteFailed {
                id: "a".into(),
                reason: "busy".into()
            }
            .is_not_found()
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(
            Error::ImagePullFailed {
                reference: "alpine".into(),
                reason: "connection refused".into()
            }
            .is_retryable()
        );
        assert!(
            !Error::InvalidVolume {
                volume: "x".into(),
                reason: "relative".into()
            }
            .is_retryable()
        );
    }
}
