//! # Container Manager
//!
//! [`ContainerManager`] is the capability set the worker loop drives for
//! each action: pull, create, start, wait, remove. [`EngineManager`] is the
//! one concrete implementation, layered over a shared [`ContainerEngine`].
//!
//! ## Waiting
//!
//! Both wait variants share one race between the task's exit notification
//! and the caller's [`Context`]:
//!
//! | First to fire | State |
//! |---------------|-------|
//! | exit code 0 | `Success` |
//! | exit code != 0 | `Failed` |
//! | context cancelled/expired | `Timeout` (context error attached) |
//! | container/task lookup or wait error | `Failed` |
//!
//! The loser is abandoned. Waiting never kills anything; the caller removes
//! the container once the terminal state is known.
//!
//! ## Removal
//!
//! [`ContainerManager::remove_container`] kills a running task, deletes it,
//! then deletes the container with its snapshot. Objects that are already
//! gone count as removed, so calling it twice is harmless.

use crate::action::{Action, ContainerState};
use crate::context::Context;
use crate::engine::{ContainerEngine, NewContainer, TaskStatus};
use crate::error::{Error, Result};
use crate::failure::report_dir;
use crate::mounts::assemble_mounts;
use crate::naming::new_container_name;
use crate::registry::ImageHandle;
use crate::spec::{NamespaceType, SpecBuilder};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Capability the runtime always grants on top of the default set.
const ADMIN_CAPABILITY: &str = "CAP_SYS_ADMIN";

/// Result of waiting for a container.
#[derive(Debug)]
pub struct WaitOutcome {
    /// Terminal state.
    pub state: ContainerState,
    /// The context error for `Timeout`, or the lookup/wait error behind a
    /// `Failed` that was not an exit code.
    pub error: Option<Error>,
}

/// Container lifecycle operations for action execution.
#[async_trait]
pub trait ContainerManager: Send + Sync {
    /// Makes an image available locally. Pulls only if it is not cached.
    async fn pull_image(&self, ctx: &Context, image: &str) -> Result<()>;

    /// Creates a container for one attempt of `action` and returns its id.
    ///
    /// `cmd` overrides the image's command when non-empty. `extra_env`
    /// entries are applied after the action's own environment.
    async fn create_container(
        &self,
        ctx: &Context,
        cmd: &[String],
        workflow_id: &str,
        action: &Action,
        privileged: bool,
        extra_env: &[String],
    ) -> Result<String>;

    /// Creates and starts the container's task.
    async fn start_container(&self, ctx: &Context, id: &str) -> Result<()>;

    /// Waits for the container to reach a terminal state.
    async fn wait_for_container(&self, ctx: &Context, id: &str) -> WaitOutcome;

    /// Same as [`wait_for_container`](Self::wait_for_container), delivering
    /// the state over `result` instead. Never fails: any error becomes
    /// `Failed`.
    async fn wait_for_failed_container(
        &self,
        ctx: &Context,
        id: &str,
        result: mpsc::Sender<ContainerState>,
    );

    /// Kills, deletes and cleans up the container. Absent objects are not
    /// an error. Cleanup is not interrupted by `ctx`.
    async fn remove_container(&self, ctx: &Context, id: &str) -> Result<()>;
}

/// [`ContainerManager`] over a [`ContainerEngine`].
pub struct EngineManager {
    engine: Arc<dyn ContainerEngine>,
    data_dir: PathBuf,
}

impl EngineManager {
    /// Creates a manager. Workflow scratch directories live under
    /// `data_dir`.
    pub fn new(engine: Arc<dyn ContainerEngine>, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        info!(
            engine = engine.name(),
            namespace = engine.namespace(),
            data_dir = %data_dir.display(),
            "Container manager ready"
        );
        Self { engine, data_dir }
    }

    /// Returns the host directory shared by every action of a workflow.
    pub fn workflow_dir(&self, workflow_id: &str) -> PathBuf {
        self.data_dir.join(workflow_id)
    }

    /// Returns the cached image, pulling it first if needed.
    async fn ensure_image(&self, ctx: &Context, image: &str) -> Result<ImageHandle> {
        match self.engine.get_image(image).await {
            Ok(handle) => {
                debug!("Image {} already present", image);
                return Ok(handle);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!("Pulling image {}", image);
        tokio::select! {
            pulled = self.engine.pull_image(image) => pulled,
            err = ctx.done() => Err(err),
        }
    }

    /// Races the task's exit against the context.
    async fn race_exit(&self, ctx: &Context, id: &str) -> WaitOutcome {
        let failed = |e: Error| WaitOutcome {
            state: ContainerState::Failed,
            error: Some(e),
        };

        if let Err(e) = self.engine.load_container(id).await {
            return failed(e);
        }
        if let Err(e) = self.engine.task_status(id).await {
            return failed(e);
        }

        tokio::select! {
            biased;
            exit = self.engine.wait_task(id) => match exit {
                Ok(code) => {
                    debug!(container_id = id, exit_code = code, "Task exited");
                    WaitOutcome {
                        state: ContainerState::from_exit_code(code),
                        error: None,
                    }
                }
                Err(e) => failed(e),
            },
            err = ctx.done() => WaitOutcome {
                state: ContainerState::Timeout,
                error: Some(err),
            },
        }
    }
}

#[async_trait]
impl ContainerManager for EngineManager {
    async fn pull_image(&self, ctx: &Context, image: &str) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        self.ensure_image(ctx, image).await.map(|_| ())
    }

    async fn create_container(
        &self,
        ctx: &Context,
        cmd: &[String],
        workflow_id: &str,
        action: &Action,
        privileged: bool,
        extra_env: &[String],
    ) -> Result<String> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        info!(
            workflow_id,
            action = %action.name,
            "Creating container (command: {:?})",
            cmd
        );

        let image = self.ensure_image(ctx, &action.image).await?;
        let id = new_container_name(&action.name);

        let workflow_dir = self.workflow_dir(workflow_id);
        crate::config::ensure_folder(&workflow_dir)?;
        let report = report_dir(&self.data_dir, workflow_id, &id);
        tokio::fs::create_dir_all(&report).await?;

        let mounts = assemble_mounts(&workflow_dir, &report, &action.volumes)?;

        let mut builder = SpecBuilder::new()
            .with_default_unix_devices()
            .with_image_config(&image.config)
            .with_env(&action.environment)
            .with_env(extra_env)
            .with_mounts(mounts)
            .with_capabilities(&[ADMIN_CAPABILITY])
            .with_host_namespace(NamespaceType::Network)
            .with_host_hosts_file()
            .with_host_resolv_conf();
        match host_name() {
            Some(hostname) => builder = builder.with_env(&[format!("HOSTNAME={}", hostname)]),
            None => warn!("Cannot read host name, HOSTNAME not injected"),
        }
        if privileged {
            builder = builder
                .with_privileged()
                .with_all_devices_allowed()
                .with_host_devices();
        }
        if !cmd.is_empty() {
            builder = builder.with_process_args(cmd);
        }
        if action.wants_host_pid() {
            builder = builder.with_host_namespace(NamespaceType::Pid);
        }

        match self.engine.remove_snapshot(&id).await {
            Ok(()) => info!("Removed stale snapshot {}", id),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Failed to remove stale snapshot {}: {}", id, e),
        }

        let created = self
            .engine
            .create_container(NewContainer {
                id: id.clone(),
                image,
                snapshot_key: id.clone(),
                spec: builder.build(),
            })
            .await;
        if let Err(e) = created {
            let _ = tokio::fs::remove_dir_all(&report).await;
            return Err(e);
        }

        Ok(id)
    }

    async fn start_container(&self, ctx: &Context, id: &str) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        info!(container_id = id, "Starting container");

        self.engine.load_container(id).await?;
        self.engine.create_task(id).await?;

        if let Err(e) = self.engine.start_task(id).await {
            if let Err(cleanup) = self.engine.delete_task(id).await {
                warn!("Failed to delete task of {} after start failure: {}", id, cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn wait_for_container(&self, ctx: &Context, id: &str) -> WaitOutcome {
        info!(container_id = id, "Waiting for container");
        self.race_exit(ctx, id).await
    }

    async fn wait_for_failed_container(
        &self,
        ctx: &Context,
        id: &str,
        result: mpsc::Sender<ContainerState>,
    ) {
        info!(container_id = id, "Waiting for container (async)");
        let outcome = self.race_exit(ctx, id).await;
        if let Some(e) = &outcome.error {
            error!(container_id = id, "Wait ended with {}: {}", outcome.state, e);
        }
        if result.send(outcome.state).await.is_err() {
            debug!("Receiver for {} is gone", id);
        }
    }

    async fn remove_container(&self, _ctx: &Context, id: &str) -> Result<()> {
        info!(container_id = id, "Removing container");

        match self.engine.load_container(id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!("Container {} already removed", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        match self.engine.task_status(id).await {
            Ok(status) => {
                if status == TaskStatus::Running {
                    match self.engine.kill_task(id).await {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
                match self.engine.delete_task(id).await {
                    Ok(code) => debug!("Deleted task {} (exit code {:?})", id, code),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        match self.engine.delete_container(id, true).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Reads the host's name.
fn host_name() -> Option<String> {
    let raw = std::fs::read_to_string(Path::new("/proc/sys/kernel/hostname")).ok()?;
    let name = raw.trim();
    (!name.is_empty()).then(|| name.to_string())
}
