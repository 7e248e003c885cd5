//! Workflow and action events.
//!
//! The worker reports progress as [`Event`]s through an [`EventRecorder`].
//! Publishing them to the provisioning server is the transport's job; the
//! runtime ships a no-op recorder and one that writes events to the log.

use crate::action::{ContainerState, FailureInfo};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Something that happened while executing a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An action's first launch attempt began.
    ActionStarted {
        workflow_id: String,
        action: String,
    },
    /// An action exited successfully.
    ActionSucceeded {
        workflow_id: String,
        action: String,
    },
    /// An action failed, or could not be launched.
    ActionFailed {
        workflow_id: String,
        action: String,
        failure: FailureInfo,
    },
    /// An action did not finish before its deadline.
    ActionTimedOut {
        workflow_id: String,
        action: String,
    },
    /// A workflow was refused before any action ran.
    WorkflowRejected {
        workflow_id: String,
        reason: String,
    },
}

impl Event {
    /// Builds the terminal event for an action outcome.
    pub fn for_outcome(
        workflow_id: &str,
        action: &str,
        state: ContainerState,
        failure: Option<FailureInfo>,
    ) -> Self {
        let workflow_id = workflow_id.to_string();
        let action = action.to_string();
        match state {
            ContainerState::Success => Self::ActionSucceeded {
                workflow_id,
                action,
            },
            ContainerState::Timeout => Self::ActionTimedOut {
                workflow_id,
                action,
            },
            _ => Self::ActionFailed {
                workflow_id,
                action,
                failure: failure.unwrap_or_else(|| FailureInfo {
                    reason: state.to_string(),
                    message: String::new(),
                }),
            },
        }
    }
}

/// Sink for workflow events.
pub trait EventRecorder: Send + Sync {
    /// Records one event. Must not block.
    fn record(&self, event: Event);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl EventRecorder for NoopRecorder {
    fn record(&self, _event: Event) {}
}

/// Writes events to the structured log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: Event) {
        match &event {
            Event::ActionStarted {
                workflow_id,
                action,
            } => info!(%workflow_id, %action, "action started"),
            Event::ActionSucceeded {
                workflow_id,
                action,
            } => info!(%workflow_id, %action, "action succeeded"),
            Event::ActionFailed {
                workflow_id,
                action,
                failure,
            } => warn!(
                %workflow_id,
                %action,
                reason = %failure.reason,
                message = %failure.message,
                "action failed"
            ),
            Event::ActionTimedOut {
                workflow_id,
                action,
            } => warn!(%workflow_id, %action, "action timed out"),
            Event::WorkflowRejected {
                workflow_id,
                reason,
            } => warn!(%workflow_id, %reason, "workflow rejected"),
        }
    }
}
