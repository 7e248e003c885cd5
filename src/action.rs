//! Workflow and action data model.
//!
//! A [`Workflow`] is an ordered list of [`Action`]s provisioning one node.
//! Each action runs as exactly one container per launch attempt and ends in
//! one terminal [`ContainerState`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Action
// =============================================================================

/// One workflow step: a container image plus its command, environment and
/// volumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Action name (used to derive the container name).
    pub name: String,
    /// Container image reference.
    pub image: String,
    /// Command override. Empty keeps the image's entrypoint/cmd.
    #[serde(default)]
    pub command: Vec<String>,
    /// Environment variables as ordered `NAME=value` entries.
    #[serde(default)]
    pub environment: Vec<String>,
    /// Raw bind-mount specs (`src:dst[:opts]`).
    #[serde(default)]
    pub volumes: Vec<String>,
    /// PID namespace request. Any non-empty value shares the host PID
    /// namespace.
    #[serde(default)]
    pub pid: Option<String>,
    /// Per-action timeout in seconds. Zero falls back to the runtime default.
    #[serde(default)]
    pub timeout: u64,
}

impl Action {
    /// Returns the per-action timeout, if one was declared.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    /// Returns true if the action asks for the host PID namespace.
    pub fn wants_host_pid(&self) -> bool {
        self.pid.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Checks the fields every action needs before anything is launched.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("action name is empty".to_string());
        }
        if self.image.trim().is_empty() {
            return Err(format!("action '{}' has no image", self.name));
        }
        Ok(())
    }
}

/// An ordered list of actions for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow identifier (names the scratch directory).
    pub id: String,
    /// Actions, executed strictly in order.
    pub actions: Vec<Action>,
}

impl Workflow {
    /// Checks the workflow before any of its actions is launched.
    ///
    /// The id names a host directory, so it must be a single plain path
    /// component.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() || self.id == "." || self.id == ".." || self.id.contains('/') {
            return Err(format!("invalid workflow id '{}'", self.id));
        }
        self.actions.iter().try_for_each(Action::validate)
    }
}

// =============================================================================
// Container State
// =============================================================================

/// Lifecycle state of the container running one action attempt.
///
/// `Success`, `Failed` and `Timeout` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Container exists, task not started.
    Created,
    /// Task is running.
    Running,
    /// Task exited with code 0.
    Success,
    /// Task exited non-zero, or could not be observed.
    Failed,
    /// The wait deadline passed before the task exited.
    Timeout,
}

impl ContainerState {
    /// Returns true for `Success`, `Failed` and `Timeout`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }

    /// Classifies a task exit code.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 { Self::Success } else { Self::Failed }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Structured cause attached to a non-success action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Short reason code (e.g. `DISK_NOT_FOUND`).
    pub reason: String,
    /// Free-text message.
    pub message: String,
}

/// Outcome of one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    /// Action name.
    pub name: String,
    /// Container of the last launch attempt, if one was created.
    pub container_id: Option<String>,
    /// Terminal state.
    pub state: ContainerState,
    /// Launch attempts made.
    pub attempts: u32,
    /// Failure details for non-success outcomes.
    pub failure: Option<FailureInfo>,
    /// When the first launch attempt began.
    pub started_at: DateTime<Utc>,
    /// When the terminal state was known.
    pub finished_at: DateTime<Utc>,
}

impl ActionReport {
    /// Returns true if the action succeeded.
    pub fn is_success(&self) -> bool {
        self.state == ContainerState::Success
    }
}

/// Outcome of a whole workflow.
///
/// Execution stops at the first non-success action, so `actions` holds every
/// executed action and nothing after the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Workflow identifier.
    pub workflow_id: String,
    /// `Success`, or the state of the first non-success action.
    pub state: ContainerState,
    /// Reports of executed actions, in order.
    pub actions: Vec<ActionReport>,
    /// Name of the action that stopped the workflow.
    pub failed_action: Option<String>,
    /// Failure details of that action.
    pub failure: Option<FailureInfo>,
}

impl WorkflowResult {
    /// Returns true if every action succeeded.
    pub fn is_success(&self) -> bool {
        self.state == ContainerState::Success
    }
}
