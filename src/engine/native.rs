//! # Native Engine (libcontainer)
//!
//! Runs action containers on Linux through youki's `libcontainer`, with
//! image, snapshot and bundle bookkeeping kept on local disk.
//!
//! ## State Layout
//!
//! ```text
//! <engine-root>/<namespace>/
//! ├── blobs/                 layer and config blobs (BlobStore)
//! ├── images/<hash>.json     image index, one record per image name
//! ├── snapshots/<key>/rootfs unpacked root filesystem per container
//! ├── bundles/<id>/          config.json + container.json
//! └── tasks/<id>/            libcontainer state
//! ```
//!
//! ## Exit Status
//!
//! libcontainer does not report exit codes. The engine marks itself a child
//! subreaper so every container init process ends up as its child, and
//! each task gets a blocking reaper that `waitpid`s the init PID and
//! publishes the exit code on a `watch` channel. [`wait_task`] resolves
//! from that channel, so waiting never polls.
//!
//! Exit codes follow the shell convention: a process killed by signal `N`
//! exits with `128 + N`.
//!
//! [`wait_task`]: super::ContainerEngine::wait_task

#[cfg(target_os = "linux")]
mod linux {
    use crate::constants::{
        BUNDLE_DIR, IMAGE_INDEX_DIR, SNAPSHOT_DIR, TASK_STATE_DIR, validate_container_id,
    };
    use crate::engine::layers::unpack_layers;
    use crate::engine::{ContainerEngine, ContainerRecord, NewContainer, TaskStatus};
    use crate::error::{Error, Result};
    use crate::registry::{ImageHandle, RegistryClient, RegistryCredentials};
    use crate::spec::resolve_user;
    use crate::storage::BlobStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use sha2::{Digest, Sha256};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::RwLock;
    use tokio::sync::watch;
    use tracing::{debug, info, warn};

    use libcontainer::container::builder::ContainerBuilder;
    use libcontainer::container::{Container, ContainerStatus as NativeStatus};
    use libcontainer::signal::Signal as LibcontainerSignal;
    use libcontainer::syscall::syscall::SyscallType;

    const CONFIG_FILE: &str = "config.json";
    const RECORD_FILE: &str = "container.json";

    /// Tracking for a created task.
    #[derive(Debug, Clone)]
    struct TaskHandle {
        /// Init process PID.
        pid: i32,
        /// Exit code, published by the reaper.
        exit: watch::Receiver<Option<i32>>,
    }

    impl TaskHandle {
        fn exit_code(&self) -> Option<i32> {
            *self.exit.borrow()
        }
    }

    /// Container engine on libcontainer.
    ///
    /// One instance serves the whole process. Task tracking is behind an
    /// internal `RwLock`; container ids are unique per attempt, so
    /// concurrent actions never contend on the same entry.
    pub struct NativeEngine {
        available: bool,
        reason: Option<String>,
        namespace: String,
        root: PathBuf,
        registry: RegistryClient,
        store: BlobStore,
        tasks: RwLock<HashMap<String, TaskHandle>>,
    }

    impl NativeEngine {
        /// Opens the engine state under `<engine_root>/<namespace>`.
        pub fn new(
            engine_root: &Path,
            namespace: &str,
            credentials: RegistryCredentials,
        ) -> Result<Self> {
            let root = engine_root.join(namespace);
            for dir in [IMAGE_INDEX_DIR, SNAPSHOT_DIR, BUNDLE_DIR, TASK_STATE_DIR] {
                let path = root.join(dir);
                std::fs::create_dir_all(&path).map_err(|e| Error::StorageInitFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            }
            let store = BlobStore::open(&root)?;
            let (available, reason) = Self::check_availability();

            info!(
                "Native engine at {} (namespace {})",
                root.display(),
                namespace
            );

            Ok(Self {
                available,
                reason,
                namespace: namespace.to_string(),
                root,
                registry: RegistryClient::new(credentials),
                store,
                tasks: RwLock::new(HashMap::new()),
            })
        }

        fn check_availability() -> (bool, Option<String>) {
            if !Path::new("/proc/self/ns/pid").exists() {
                return (false, Some("Linux namespaces not available".to_string()));
            }

            // SAFETY: PR_SET_CHILD_SUBREAPER only changes how orphaned
            // descendants of this process are reparented.
            let rc = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                return (false, Some(format!("cannot become child subreaper: {}", err)));
            }

            (true, None)
        }

        /// Returns the reason the engine cannot run containers, if any.
        pub fn unavailable_reason(&self) -> Option<&str> {
            self.reason.as_deref()
        }

        fn ensure_available(&self) -> Result<()> {
            if self.available {
                return Ok(());
            }
            Err(Error::EngineUnavailable {
                engine: "native".to_string(),
                reason: self.reason.clone().unwrap_or_default(),
            })
        }

        fn image_record_path(&self, name: &str) -> PathBuf {
            let key = hex::encode(Sha256::digest(name.as_bytes()));
            self.root.join(IMAGE_INDEX_DIR).join(format!("{}.json", key))
        }

        fn snapshot_dir(&self, key: &str) -> PathBuf {
            self.root.join(SNAPSHOT_DIR).join(key)
        }

        fn bundle_dir(&self, id: &str) -> PathBuf {
            self.root.join(BUNDLE_DIR).join(id)
        }

        fn state_root(&self) -> PathBuf {
            self.root.join(TASK_STATE_DIR)
        }

        fn load_native(&self, id: &str) -> Result<Container> {
            let dir = self.state_root().join(id);
            if !dir.exists() {
                return Err(Error::TaskNotFound(id.to_string()));
            }
            Container::load(dir).map_err(|e| Error::Internal(format!(
                "failed to load task state for {}: {}",
                id, e
            )))
        }

        fn task(&self, id: &str) -> Result<TaskHandle> {
            let tasks = self
                .tasks
                .read()
                .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?;
            tasks
                .get(id)
                .cloned()
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))
        }

        async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
            let data = serde_json::to_vec_pretty(value)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            let temp = path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
            tokio::fs::write(&temp, data).await?;
            tokio::fs::rename(&temp, path).await?;
            Ok(())
        }
    }

    #[async_trait]
    impl ContainerEngine for NativeEngine {
        fn name(&self) -> &str {
            "native"
        }

        fn namespace(&self) -> &str {
            &self.namespace
        }

        async fn get_image(&self, name: &str) -> Result<ImageHandle> {
            let path = self.image_record_path(name);
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::ImageNotFound(name.to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            let image: ImageHandle = serde_json::from_slice(&data)
                .map_err(|e| Error::Serialization(e.to_string()))?;

            // An image whose blobs were removed is not runnable.
            if image.layers.iter().any(|l| !self.store.has_blob(&l.digest)) {
                debug!("Image {} has missing layers, treating as absent", name);
                return Err(Error::ImageNotFound(name.to_string()));
            }
            Ok(image)
        }

        async fn pull_image(&self, name: &str) -> Result<ImageHandle> {
            let image = self.registry.pull(name, &self.store).await?;
            Self::write_json(&self.image_record_path(name), &image).await?;
            info!("Image {} stored ({})", name, image.digest);
            Ok(image)
        }

        async fn remove_snapshot(&self, key: &str) -> Result<()> {
            validate_container_id(key).map_err(|reason| Error::SnapshotFailed {
                key: key.to_string(),
                reason: reason.to_string(),
            })?;
            let dir = self.snapshot_dir(key);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    debug!("Removed snapshot {}", key);
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(Error::SnapshotNotFound(key.to_string()))
                }
                Err(e) => Err(Error::SnapshotFailed {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            }
        }

        async fn create_container(&self, container: NewContainer) -> Result<ContainerRecord> {
            self.ensure_available()?;
            let NewContainer {
                id,
                image,
                snapshot_key,
                mut spec,
            } = container;

            validate_container_id(&id).map_err(|reason| Error::InvalidContainerId {
                id: id.clone(),
                reason: reason.to_string(),
            })?;
            validate_container_id(&snapshot_key).map_err(|reason| Error::SnapshotFailed {
                key: snapshot_key.clone(),
                reason: reason.to_string(),
            })?;

            let bundle = self.bundle_dir(&id);
            if bundle.exists() {
                return Err(Error::ContainerAlreadyExists(id));
            }
            let snapshot = self.snapshot_dir(&snapshot_key);
            if snapshot.exists() {
                return Err(Error::SnapshotExists(snapshot_key));
            }

            // Prepare the snapshot.
            let rootfs = snapshot.join("rootfs");
            tokio::fs::create_dir_all(&rootfs)
                .await
                .map_err(|e| Error::SnapshotFailed {
                    key: snapshot_key.clone(),
                    reason: e.to_string(),
                })?;
            let layers = image.layers.clone();
            let store = self.store.clone();
            let target = rootfs.clone();
            let unpacked = tokio::task::spawn_blocking(move || unpack_layers(&layers, &target, &store))
                .await
                .map_err(|e| Error::Internal(format!("unpack task failed: {}", e)))
                .and_then(|r| r);
            if let Err(e) = unpacked {
                let _ = tokio::fs::remove_dir_all(&snapshot).await;
                return Err(e);
            }

            // Named image users only resolve once the rootfs exists.
            if let Some(user) = image.config.user.as_deref().filter(|u| !u.is_empty()) {
                match resolve_user(&rootfs, user) {
                    Ok(resolved) => spec.process.user = resolved,
                    Err(reason) => {
                        let _ = tokio::fs::remove_dir_all(&snapshot).await;
                        return Err(Error::InvalidImageConfig {
                            reference: image.reference.clone(),
                            reason,
                        });
                    }
                }
            }

            // Write the bundle.
            spec.root.path = rootfs.to_string_lossy().to_string();
            let record = ContainerRecord {
                id: id.clone(),
                image: image.reference.clone(),
                snapshot_key: snapshot_key.clone(),
                created_at: Utc::now(),
            };
            let written = async {
                tokio::fs::create_dir_all(&bundle).await?;
                Self::write_json(&bundle.join(CONFIG_FILE), &spec).await?;
                Self::write_json(&bundle.join(RECORD_FILE), &record).await
            }
            .await;
            if let Err(e) = written {
                let _ = tokio::fs::remove_dir_all(&bundle).await;
                let _ = tokio::fs::remove_dir_all(&snapshot).await;
                return Err(Error::CreateFailed {
                    id,
                    reason: e.to_string(),
                });
            }

            info!("Created container {} (snapshot {})", id, snapshot_key);
            Ok(record)
        }

        async fn load_container(&self, id: &str) -> Result<ContainerRecord> {
            if validate_container_id(id).is_err() {
                return Err(Error::ContainerNotFound(id.to_string()));
            }
            let path = self.bundle_dir(id).join(RECORD_FILE);
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::ContainerNotFound(id.to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            serde_json::from_slice(&data).map_err(|e| Error::Serialization(e.to_string()))
        }

        async fn delete_container(&self, id: &str, cleanup_snapshot: bool) -> Result<()> {
            let record = self.load_container(id).await?;
            if self.task(id).is_ok() {
                return Err(Error::DeleteFailed {
                    id: id.to_string(),
                    reason: "task must be deleted first".to_string(),
                });
            }

            tokio::fs::remove_dir_all(self.bundle_dir(id))
                .await
                .map_err(|e| Error::DeleteFailed {
                    id: id.to_string(),
                    reason: e.to_string(),
                })?;

            if cleanup_snapshot {
                match self.remove_snapshot(&record.snapshot_key).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => warn!("Snapshot cleanup for {} failed: {}", id, e),
                }
            }

            info!("Deleted container {}", id);
            Ok(())
        }

        async fn create_task(&self, id: &str) -> Result<()> {
            self.ensure_available()?;
            self.load_container(id).await?;
            if self.task(id).is_ok() {
                return Err(Error::TaskCreateFailed {
                    id: id.to_string(),
                    reason: "task already exists".to_string(),
                });
            }

            let state_root = self.state_root();
            let bundle = self.bundle_dir(id);
            let container_id = id.to_string();
            let pid = tokio::task::spawn_blocking(move || -> Result<i32> {
                let failed = |reason: String| Error::TaskCreateFailed {
                    id: container_id.clone(),
                    reason,
                };
                let container = ContainerBuilder::new(container_id.clone(), SyscallType::default())
                    .with_root_path(&state_root)
                    .map_err(|e| failed(format!("invalid root path: {}", e)))?
                    .validate_id()
                    .map_err(|e| failed(format!("invalid container id: {}", e)))?
                    .as_init(&bundle)
                    .with_systemd(false)
                    .build()
                    .map_err(|e| failed(format!("build failed: {}", e)))?;
                container
                    .pid()
                    .map(|p| p.as_raw())
                    .ok_or_else(|| failed("runtime reported no init pid".to_string()))
            })
            .await
            .map_err(|e| Error::Internal(format!("task create panicked: {}", e)))??;

            let (tx, rx) = watch::channel(None);
            let reaped_id = id.to_string();
            tokio::task::spawn_blocking(move || match reap(pid) {
                Some(code) => {
                    debug!("Task {} (pid {}) exited with {}", reaped_id, pid, code);
                    let _ = tx.send(Some(code));
                }
                None => warn!("Could not reap task {} (pid {})", reaped_id, pid),
            });

            self.tasks
                .write()
                .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?
                .insert(id.to_string(), TaskHandle { pid, exit: rx });

            debug!("Created task {} (pid {})", id, pid);
            Ok(())
        }

        async fn start_task(&self, id: &str) -> Result<()> {
            self.task(id)?;
            let mut container = self.load_native(id)?;
            container.start().map_err(|e| Error::StartFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
            info!("Started task {}", id);
            Ok(())
        }

        async fn task_status(&self, id: &str) -> Result<TaskStatus> {
            let task = self.task(id)?;
            if task.exit_code().is_some() {
                return Ok(TaskStatus::Stopped);
            }
            let container = match self.load_native(id) {
                Ok(container) => container,
                Err(e) => {
                    debug!("Task {} state unreadable: {}", id, e);
                    return Ok(TaskStatus::Unknown);
                }
            };
            Ok(match container.state.status {
                NativeStatus::Creating | NativeStatus::Created => TaskStatus::Created,
                NativeStatus::Running | NativeStatus::Paused => TaskStatus::Running,
                NativeStatus::Stopped => TaskStatus::Stopped,
            })
        }

        async fn wait_task(&self, id: &str) -> Result<i32> {
            let mut task = self.task(id)?;
            let code = *task
                .exit
                .wait_for(|code| code.is_some())
                .await
                .map_err(|_| Error::WaitFailed {
                    id: id.to_string(),
                    reason: format!("exit status of pid {} was lost", task.pid),
                })?;
            code.ok_or_else(|| Error::WaitFailed {
                id: id.to_string(),
                reason: "no exit status".to_string(),
            })
        }

        async fn kill_task(&self, id: &str) -> Result<()> {
            let task = self.task(id)?;
            if task.exit_code().is_some() {
                debug!("Task {} already exited, not killing", id);
                return Ok(());
            }

            let lc_signal =
                LibcontainerSignal::try_from("SIGKILL").map_err(|e| Error::SignalFailed {
                    id: id.to_string(),
                    reason: format!("invalid signal: {}", e),
                })?;
            let mut container = self.load_native(id)?;
            container
                .kill(lc_signal, true)
                .map_err(|e| Error::SignalFailed {
                    id: id.to_string(),
                    reason: e.to_string(),
                })?;

            info!("Killed task {}", id);
            Ok(())
        }

        async fn delete_task(&self, id: &str) -> Result<Option<i32>> {
            let task = self.task(id)?;

            match self.load_native(id) {
                Ok(mut container) => {
                    container.delete(true).map_err(|e| Error::DeleteFailed {
                        id: id.to_string(),
                        reason: e.to_string(),
                    })?;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }

            self.tasks
                .write()
                .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?
                .remove(id);

            debug!("Deleted task {}", id);
            Ok(task.exit_code())
        }
    }

    /// Blocks until `pid` exits and returns its exit code.
    ///
    /// Returns `None` if the process is not a child of this one.
    fn reap(pid: i32) -> Option<i32> {
        loop {
            let mut status: libc::c_int = 0;
            // SAFETY: waitpid only writes the status through a valid pointer.
            let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
            if rc == pid {
                if libc::WIFEXITED(status) {
                    return Some(libc::WEXITSTATUS(status));
                }
                if libc::WIFSIGNALED(status) {
                    return Some(128 + libc::WTERMSIG(status));
                }
                continue;
            }
            if rc < 0 && std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return None;
        }
    }
}

// =============================================================================
// Non-Linux Stub
// =============================================================================

#[cfg(not(target_os = "linux"))]
mod stub {
    use crate::engine::{ContainerEngine, ContainerRecord, NewContainer, TaskStatus};
    use crate::error::{Error, Result};
    use crate::registry::{ImageHandle, RegistryCredentials};
    use async_trait::async_trait;
    use std::path::Path;

    fn unavailable() -> Error {
        Error::EngineUnavailable {
            engine: "native".to_string(),
            reason: "Linux required".to_string(),
        }
    }

    /// Stub engine for non-Linux platforms. Every operation fails with
    /// [`Error::EngineUnavailable`].
    pub struct NativeEngine {
        namespace: String,
    }

    impl NativeEngine {
        /// Creates an (unavailable) engine.
        pub fn new(
            _engine_root: &Path,
            namespace: &str,
            _credentials: RegistryCredentials,
        ) -> Result<Self> {
            Ok(Self {
                namespace: namespace.to_string(),
            })
        }

        /// Returns why the engine cannot run containers.
        pub fn unavailable_reason(&self) -> Option<&str> {
            Some("native engine requires Linux (namespaces, cgroups)")
        }
    }

    #[async_trait]
    impl ContainerEngine for NativeEngine {
        fn name(&self) -> &str {
            "native"
        }

        fn namespace(&self) -> &str {
            &self.namespace
        }

        async fn get_image(&self, _name: &str) -> Result<ImageHandle> {
            Err(unavailable())
        }

        async fn pull_image(&self, _name: &str) -> Result<ImageHandle> {
            Err(unavailable())
        }

        async fn remove_snapshot(&self, _key: &str) -> Result<()> {
            Err(unavailable())
        }

        async fn create_container(&self, _container: NewContainer) -> Result<ContainerRecord> {
            Err(unavailable())
        }

        async fn load_container(&self, _id: &str) -> Result<ContainerRecord> {
            Err(unavailable())
        }

        async fn delete_container(&self, _id: &str, _cleanup_snapshot: bool) -> Result<()> {
            Err(unavailable())
        }

        async fn create_task(&self, _id: &str) -> Result<()> {
            Err(unavailable())
        }

        async fn start_task(&self, _id: &str) -> Result<()> {
            Err(unavailable())
        }

        async fn task_status(&self, _id: &str) -> Result<TaskStatus> {
            Err(unavailable())
        }

        async fn wait_task(&self, _id: &str) -> Result<i32> {
            Err(unavailable())
        }

        async fn kill_task(&self, _id: &str) -> Result<()> {
            Err(unavailable())
        }

        async fn delete_task(&self, _id: &str) -> Result<Option<i32>> {
            Err(unavailable())
        }
    }
}

// =============================================================================
// Re-exports
// =============================================================================

#[cfg(target_os = "linux")]
pub use linux::NativeEngine;

#[cfg(not(target_os = "linux"))]
pub use stub::NativeEngine;
