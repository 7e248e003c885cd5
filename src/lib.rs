//! # tinkrun
//!
//! **On-node workflow action runtime**
//!
//! This crate runs a provisioning workflow on the node being provisioned.
//! A workflow is an ordered list of actions; each action is an opaque OCI
//! image executed as an isolated container. The runtime pulls the image,
//! builds the container's runtime spec, starts it, waits for a terminal
//! state, reads the failure report an action may leave behind, and always
//! removes the container afterwards.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              tinkrun                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                    Worker (action executor)                 │    │
//! │  │  Pull → Create → Start  (fixed-interval retry)              │    │
//! │  │  Wait (deadline) → failure files → Remove → next action     │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                 ContainerManager trait                    │      │
//! │  │  EngineManager: names │ mounts │ OCI spec │ exit race     │      │
//! │  └───────────────────────────┼───────────────────────────────┘      │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                 ContainerEngine trait                     │      │
//! │  │  images │ snapshots │ containers │ tasks                  │      │
//! │  └───────────────────────────┼───────────────────────────────┘      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  NativeEngine (libcontainer)  │  RegistryClient  │  BlobStore       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Action Lifecycle
//!
//! ```text
//!   ┌─────────┐  create  ┌─────────┐  start  ┌─────────┐
//!   │ (none)  │ ───────► │ Created │ ──────► │ Running │
//!   └─────────┘          └─────────┘         └────┬────┘
//!                                                 │ exit / deadline
//!                             ┌───────────────────┼───────────────────┐
//!                             ▼                   ▼                   ▼
//!                        ┌─────────┐         ┌─────────┐         ┌─────────┐
//!                        │ Success │         │ Failed  │         │ Timeout │
//!                        └─────────┘         └─────────┘         └─────────┘
//!                             └───────────── remove ──────────────────┘
//! ```
//!
//! # Container Contract
//!
//! Every action container sees:
//!
//! - the fixed host mounts (`/sys`, `/dev`, `/mnt`, `/dev/console`,
//!   `/lib/modules` read-only, `/lib/firmware`, `/worker`)
//! - the workflow scratch directory at `/workflow`
//! - its failure report directory at `/tinkerbell`
//! - its declared volumes, minus any that target a denied destination
//! - host network, `/etc/hosts` and `/etc/resolv.conf`
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tinkrun::{Context, EngineManager, NativeEngine, RuntimeConfig, Worker};
//!
//! #[tokio::main]
//! async fn main() -> tinkrun::Result<()> {
//!     let config = RuntimeConfig::new("worker-1");
//!     let engine = NativeEngine::new(
//!         std::path::Path::new(tinkrun::DEFAULT_ENGINE_ROOT),
//!         tinkrun::ENGINE_NAMESPACE,
//!         Default::default(),
//!     )?;
//!     let manager = EngineManager::new(Arc::new(engine), &config.data_dir);
//!     let worker = Worker::new(Arc::new(manager), config);
//!
//!     let workflow = serde_json::from_str(r#"{"id":"wf","actions":[]}"#)
//!         .map_err(|e| tinkrun::Error::Serialization(e.to_string()))?;
//!     let result = worker.run_workflow(&Context::background(), &workflow).await;
//!     println!("{}", result.state);
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod config;
pub mod constants;
pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod failure;
pub mod logs;
pub mod manager;
pub mod mounts;
pub mod naming;
pub mod reboot;
pub mod registry;
pub mod spec;
pub mod storage;
pub mod worker;

// Re-exports
pub use action::{Action, ActionReport, ContainerState, FailureInfo, Workflow, WorkflowResult};
pub use config::{BootConfig, RuntimeConfig};
pub use constants::*;
pub use context::Context;
pub use engine::{ContainerEngine, NativeEngine};
pub use error::{Error, Result};
pub use event::{Event, EventRecorder, NoopRecorder, TracingRecorder};
pub use failure::{FailureReasonReader, FailureReport};
pub use logs::{LogCapturer, NoopLogCapturer, StdioLogCapturer};
pub use manager::{ContainerManager, EngineManager, WaitOutcome};
pub use reboot::RebootWatcher;
pub use registry::{ImageHandle, RegistryClient, RegistryCredentials};
pub use storage::BlobStore;
pub use worker::Worker;
