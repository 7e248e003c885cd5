//! # Container Engine Abstraction
//!
//! [`ContainerEngine`] is the thin, namespaced handle to the local engine
//! that every action reuses for the lifetime of the process. It speaks in
//! engine objects (images, snapshots, containers, tasks) and knows nothing
//! about workflows. Policy lives in [`crate::manager`].
//!
//! ## Object Model
//!
//! ```text
//! image ──(snapshot prepare)──> snapshot ──┐
//!                                          ├──> container ──> task (process)
//! OCI runtime spec ────────────────────────┘
//! ```
//!
//! - A **container** is metadata: id, image, snapshot key and spec. It
//!   runs nothing by itself.
//! - A **task** is the running process of a container. A container has at
//!   most one task.
//! - Deleting a container with snapshot cleanup also removes its snapshot.
//!
//! ## Lifecycle
//!
//! ```text
//! create_container → create_task → start_task → wait_task
//!                                      │
//!                        kill_task ─┴→ delete_task → delete_container
//! ```
//!
//! ## Implementations
//!
//! - [`NativeEngine`]: Linux containers via youki's `libcontainer`

pub mod layers;
pub mod native;

pub use native::NativeEngine;

use crate::error::Result;
use crate::registry::ImageHandle;
use crate::spec::OciSpec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Engine Objects
// =============================================================================

/// Status of a container's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Process created, not yet started.
    Created,
    /// Process is running.
    Running,
    /// Process has exited.
    Stopped,
    /// Status could not be determined.
    Unknown,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Everything the engine needs to create one container.
#[derive(Debug, Clone)]
pub struct NewContainer {
    /// Container id (also the engine-visible name).
    pub id: String,
    /// Image the snapshot is prepared from.
    pub image: ImageHandle,
    /// Key of the fresh snapshot bound to the container.
    pub snapshot_key: String,
    /// Runtime spec. The engine fills in the root path.
    pub spec: OciSpec,
}

/// Engine record of a created container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Container id.
    pub id: String,
    /// Image name.
    pub image: String,
    /// Snapshot bound to the container.
    pub snapshot_key: String,
    /// When the container was created.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Container Engine Trait
// =============================================================================

/// Namespaced client of a local OCI container engine.
///
/// Lookups of absent objects fail with an error for which
/// [`Error::is_not_found`](crate::error::Error::is_not_found) holds.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Returns the engine name.
    fn name(&self) -> &str;

    /// Returns the namespace all objects live in.
    fn namespace(&self) -> &str;

    // =========================================================================
    // Images
    // =========================================================================

    /// Looks up an already pulled image by name.
    async fn get_image(&self, name: &str) -> Result<ImageHandle>;

    /// Pulls an image and unpacks it so it can be run immediately.
    async fn pull_image(&self, name: &str) -> Result<ImageHandle>;

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Removes a snapshot.
    async fn remove_snapshot(&self, key: &str) -> Result<()>;

    // =========================================================================
    // Containers
    // =========================================================================

    /// Creates a container bound to a freshly prepared snapshot.
    async fn create_container(&self, container: NewContainer) -> Result<ContainerRecord>;

    /// Loads a container record.
    async fn load_container(&self, id: &str) -> Result<ContainerRecord>;

    /// Deletes a container, and its snapshot when `cleanup_snapshot` is set.
    async fn delete_container(&self, id: &str, cleanup_snapshot: bool) -> Result<()>;

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Creates the container's task, attached to the engine's standard I/O.
    async fn create_task(&self, id: &str) -> Result<()>;

    /// Starts a created task.
    async fn start_task(&self, id: &str) -> Result<()>;

    /// Returns the status of the container's task.
    async fn task_status(&self, id: &str) -> Result<TaskStatus>;

    /// Resolves with the task's exit code once it exits.
    ///
    /// The future can be dropped at any time without affecting the task.
    async fn wait_task(&self, id: &str) -> Result<i32>;

    /// Sends SIGKILL to every process of the task.
    async fn kill_task(&self, id: &str) -> Result<()>;

    /// Deletes the task, returning its exit code if it had exited.
    async fn delete_task(&self, id: &str) -> Result<Option<i32>>;
}
