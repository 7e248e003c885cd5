//! # Action Runtime Constants
//!
//! Defines the host paths, name limits, mount tables, and policy defaults
//! for the action runtime. These constants are the **single source of
//! truth** for the contract between the runtime and the actions it runs.
//!
//! ## Modification Guidelines
//!
//! The fixed mount table, the deny-list and the failure-file paths are an
//! interface to action image authors. Changing any of them breaks actions
//! that rely on the current layout.
//!
//! ## Cross-References
//!
//! - [`crate::mounts`]: Uses the fixed mount table and the deny-list
//! - [`crate::naming`]: Uses the name length limits
//! - [`crate::failure`]: Uses the failure-file paths
//! - [`crate::worker`]: Uses the retry and timeout defaults

use std::time::Duration;

// =============================================================================
// Container Engine
// =============================================================================

/// Namespace every container, image and snapshot of this runtime lives in.
pub const ENGINE_NAMESPACE: &str = "tinkerbell";

/// Root directory for engine state (image index, snapshots, bundles, tasks).
///
/// Structure: `<root>/<namespace>/{images,snapshots,bundles,tasks,blobs}`
pub const DEFAULT_ENGINE_ROOT: &str = "/var/lib/tinkrun";

/// Subdirectory for the image index (one JSON record per image name).
pub const IMAGE_INDEX_DIR: &str = "images";

/// Subdirectory for per-container filesystem snapshots.
pub const SNAPSHOT_DIR: &str = "snapshots";

/// Subdirectory for OCI runtime bundles (`config.json`).
pub const BUNDLE_DIR: &str = "bundles";

/// Subdirectory for task state (libcontainer state root).
pub const TASK_STATE_DIR: &str = "tasks";

/// Subdirectory for content-addressed blob storage.
///
/// Structure: `blobs/sha256/<2-char-prefix>/<full-hash>`
pub const BLOB_STORE_DIR: &str = "blobs";

/// OCI Runtime Spec version for generated `config.json`.
pub const OCI_RUNTIME_SPEC_VERSION: &str = "1.0.2";

// =============================================================================
// Container Names
// =============================================================================

/// Maximum container name length accepted by the engine.
pub const MAX_CONTAINER_NAME_LEN: usize = 76;

/// Maximum number of bytes of the action name kept in a container name.
pub const MAX_ACTION_NAME_PREFIX_LEN: usize = 60;

/// Length of the random suffix appended to every container name.
pub const CONTAINER_NAME_SUFFIX_LEN: usize = 10;

/// Prefix used when an action name has no usable characters.
pub const FALLBACK_ACTION_NAME: &str = "action";

/// Valid characters for container names/IDs.
///
/// **Security**: Excludes `/`, `.`, and other characters that could be used
/// for path traversal when container names are used in filesystem paths.
pub const CONTAINER_NAME_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

/// Maximum OCI image reference length in bytes.
pub const MAX_IMAGE_REF_LEN: usize = 512;

// =============================================================================
// Mounts
// =============================================================================

/// Destination of the per-workflow scratch directory inside every container.
pub const WORKFLOW_MOUNT_DESTINATION: &str = "/workflow";

/// Destination of the per-attempt failure report directory.
pub const REPORT_MOUNT_DESTINATION: &str = "/tinkerbell";

/// Host subdirectory (under the workflow scratch directory) holding the
/// per-attempt failure report directories.
pub const REPORT_DIR: &str = ".reports";

/// Host paths bind-mounted into every action container.
///
/// Tuple layout: `(source/destination, read_only)`. The per-workflow
/// scratch directory is appended separately since its source varies.
pub const FIXED_HOST_MOUNTS: &[(&str, bool)] = &[
    ("/sys", false),
    ("/dev", false),
    ("/mnt", false),
    ("/dev/console", false),
    ("/lib/modules", true),
    ("/lib/firmware", false),
    ("/worker", false),
];

/// Destinations an action-declared volume may never target.
///
/// **Security**: Remounting any of these would shadow the fixed host mounts
/// or the runtime's own state and destabilise the node.
///
/// Only applied to action volumes. The fixed set is trusted.
pub const MOUNT_DENY_LIST: &[&str] = &[
    "/mnt",
    "/sys",
    "/dev/console",
    "/dev",
    "/worker",
    "/lib/modules",
    "/lib/firmware",
    "/workflow",
    "/etc/hosts",
    "/etc/resolv.conf",
    "/etc/localtime",
];

// =============================================================================
// Failure Reporting
// =============================================================================

/// Path inside the action container where a failing action writes a short
/// reason code.
pub const FAILURE_REASON_PATH: &str = "/tinkerbell/failure-reason";

/// Path inside the action container where a failing action writes a
/// free-text message.
pub const FAILURE_MESSAGE_PATH: &str = "/tinkerbell/failure-message";

/// Reason recorded when a failed action left no reason file.
pub const GENERIC_FAILURE_REASON: &str = "ActionFailed";

/// Message recorded when a failed action left no message file.
pub const GENERIC_FAILURE_MESSAGE: &str = "action container exited with a non-zero status";

/// Reason recorded when an action did not finish before its deadline.
pub const TIMEOUT_FAILURE_REASON: &str = "Timeout";

/// Reason recorded when an action could not be launched at all.
pub const LAUNCH_FAILURE_REASON: &str = "LaunchFailed";

/// Reason recorded when a workflow is refused before any action runs.
pub const REJECTED_FAILURE_REASON: &str = "InvalidWorkflow";

// =============================================================================
// Runtime Defaults
// =============================================================================

/// Default fixed delay between launch attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Default number of launch attempts per action.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default cap on bytes read from action-written files (10 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default per-action timeout (60 minutes). Zero disables the timeout.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Host directory holding worker state and per-workflow scratch areas.
pub const DEFAULT_DATA_DIR: &str = "/worker";

/// Timeout for image pull operations (5 minutes).
///
/// **Security**: Prevents indefinite hangs from unresponsive registries
/// or network partitions. Includes manifest fetch and all layer downloads.
pub const IMAGE_PULL_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum size of a single compressed OCI layer (512 MiB).
pub const MAX_LAYER_SIZE: usize = 512 * 1024 * 1024;

/// Maximum total extracted rootfs size (8 GiB).
///
/// Provisioning images (OS installers, disk writers) are larger than typical
/// service images.
pub const MAX_ROOTFS_SIZE: u64 = 8 * 1024 * 1024 * 1024;

/// Maximum number of layers in an OCI image.
pub const MAX_LAYERS: usize = 128;

/// Maximum image config blob size (1 MiB).
pub const MAX_CONFIG_SIZE: usize = 1024 * 1024;

// =============================================================================
// Node Bootstrap
// =============================================================================

/// Kernel command line consumed by [`crate::config::init_node`].
pub const KERNEL_CMDLINE_PATH: &str = "/proc/cmdline";

/// Directories that must exist before the first action runs.
pub const REQUIRED_HOST_DIRS: &[&str] = &["/worker", "/lib/firmware"];

/// File whose presence requests a node reboot.
pub const REBOOT_REQUEST_PATH: &str = "/worker/reboot";

/// Binary invoked to reboot the node.
pub const REBOOT_BINARY: &str = "/sbin/reboot";

/// Poll interval of the reboot watcher.
pub const REBOOT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Container ID Validation Helper
// =============================================================================

/// Validates a container ID for safety.
///
/// # Security
///
/// Container IDs become path components under the engine root, so they must:
/// - Be non-empty
/// - Not exceed `MAX_CONTAINER_NAME_LEN`
/// - Only contain characters from `CONTAINER_NAME_VALID_CHARS`
#[inline]
#[must_use = "validation result must be checked to ensure container ID is safe"]
pub fn validate_container_id(id: &str) -> std::result::Result<(), &'static str> {
    if id.is_empty() {
        return Err("container ID cannot be empty");
    }
    if id.len() > MAX_CONTAINER_NAME_LEN {
        return Err("container ID exceeds maximum length");
    }
    if !id.chars().all(|c| CONTAINER_NAME_VALID_CHARS.contains(c)) {
        return Err("container ID contains invalid characters");
    }
    Ok(())
}
