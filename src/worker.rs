//! # Action Executor
//!
//! [`Worker`] runs one workflow: its actions strictly in order, each through
//! Pull, Create, Start and Wait on a [`ContainerManager`].
//!
//! ## Policy
//!
//! | Situation | Handling |
//! |-----------|----------|
//! | pull/create/start error | whole launch sequence retried, fixed interval, bounded attempts |
//! | retries exhausted | action `Failed` ([`LAUNCH_FAILURE_REASON`]), workflow aborted |
//! | task exits non-zero | action `Failed` with the reported failure files, never retried |
//! | deadline passes | action `Timeout`, never retried |
//!
//! The container of every attempt that got as far as creation is removed,
//! whatever its outcome. The first non-success action ends the workflow.

use crate::action::{Action, ActionReport, ContainerState, FailureInfo, Workflow, WorkflowResult};
use crate::config::RuntimeConfig;
use crate::constants::{LAUNCH_FAILURE_REASON, REJECTED_FAILURE_REASON, TIMEOUT_FAILURE_REASON};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::event::{Event, EventRecorder, TracingRecorder};
use crate::failure::{FailureReasonReader, report_dir};
use crate::logs::{LogCapturer, NoopLogCapturer};
use crate::manager::ContainerManager;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Executes workflows on this node.
pub struct Worker {
    manager: Arc<dyn ContainerManager>,
    capturer: Arc<dyn LogCapturer>,
    recorder: Arc<dyn EventRecorder>,
    reader: FailureReasonReader,
    config: RuntimeConfig,
}

/// Result of the launch phase of one action.
struct Launch {
    container: Result<String>,
    attempts: u32,
}

impl Worker {
    /// Creates a worker that discards container output and logs events.
    ///
    /// `config.data_dir` must match the manager's data directory, since
    /// failure reports are read from there.
    pub fn new(manager: Arc<dyn ContainerManager>, config: RuntimeConfig) -> Self {
        Self {
            manager,
            capturer: Arc::new(NoopLogCapturer),
            recorder: Arc::new(TracingRecorder),
            reader: FailureReasonReader::new(config.max_file_size),
            config,
        }
    }

    pub fn with_log_capturer(mut self, capturer: Arc<dyn LogCapturer>) -> Self {
        self.capturer = capturer;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Runs every action of `workflow` in order, stopping at the first one
    /// that does not succeed.
    pub async fn run_workflow(&self, ctx: &Context, workflow: &Workflow) -> WorkflowResult {
        info!(
            workflow_id = %workflow.id,
            worker_id = %self.config.worker_id,
            "Running workflow with {} action(s)",
            workflow.actions.len()
        );

        if let Err(reason) = workflow.validate() {
            warn!(workflow_id = %workflow.id, "Rejecting workflow: {}", reason);
            self.recorder.record(Event::WorkflowRejected {
                workflow_id: workflow.id.clone(),
                reason: reason.clone(),
            });
            return WorkflowResult {
                workflow_id: workflow.id.clone(),
                state: ContainerState::Failed,
                actions: Vec::new(),
                failed_action: None,
                failure: Some(FailureInfo {
                    reason: REJECTED_FAILURE_REASON.to_string(),
                    message: reason,
                }),
            };
        }

        let mut reports = Vec::with_capacity(workflow.actions.len());
        for action in &workflow.actions {
            let report = self.run_action(ctx, &workflow.id, action).await;
            let done = !report.is_success();
            reports.push(report);
            if done {
                break;
            }
        }

        let (state, failed_action, failure) = match reports.last() {
            Some(last) if !last.is_success() => {
                error!(
                    workflow_id = %workflow.id,
                    action = %last.name,
                    "Workflow aborted: action ended {}",
                    last.state
                );
                (last.state, Some(last.name.clone()), last.failure.clone())
            }
            _ => {
                info!(workflow_id = %workflow.id, "Workflow completed");
                (ContainerState::Success, None, None)
            }
        };

        WorkflowResult {
            workflow_id: workflow.id.clone(),
            state,
            actions: reports,
            failed_action,
            failure,
        }
    }

    /// Launches one action, waits for it and cleans up after it.
    async fn run_action(&self, ctx: &Context, workflow_id: &str, action: &Action) -> ActionReport {
        let started_at = Utc::now();
        self.recorder.record(Event::ActionStarted {
            workflow_id: workflow_id.to_string(),
            action: action.name.clone(),
        });

        let Launch {
            container,
            attempts,
        } = self.launch_with_retry(ctx, workflow_id, action).await;

        let (container_id, state, failure) = match container {
            Ok(id) => {
                let (state, failure) = self.await_exit(ctx, workflow_id, action, &id).await;
                self.cleanup(ctx, workflow_id, &id).await;
                (Some(id), state, failure)
            }
            Err(e) => {
                error!(workflow_id, action = %action.name, "Launch failed: {}", e);
                let failure = FailureInfo {
                    reason: LAUNCH_FAILURE_REASON.to_string(),
                    message: e.to_string(),
                };
                (None, ContainerState::Failed, Some(failure))
            }
        };

        self.recorder.record(Event::for_outcome(
            workflow_id,
            &action.name,
            state,
            failure.clone(),
        ));

        ActionReport {
            name: action.name.clone(),
            container_id,
            state,
            attempts,
            failure,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Runs Pull, Create and Start, retrying the whole sequence on error.
    async fn launch_with_retry(&self, ctx: &Context, workflow_id: &str, action: &Action) -> Launch {
        let max_attempts = self.config.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.launch(ctx, workflow_id, action).await {
                Ok(id) => {
                    return Launch {
                        container: Ok(id),
                        attempts: attempt,
                    };
                }
                Err(e) => e,
            };

            warn!(
                workflow_id,
                action = %action.name,
                attempt,
                max_attempts,
                retryable = err.is_retryable(),
                "Launch attempt failed: {}",
                err
            );

            let canceled = ctx.err().is_some();
            if canceled || attempt >= max_attempts {
                return Launch {
                    container: Err(Error::RetriesExhausted {
                        action: action.name.clone(),
                        attempts: attempt,
                        reason: err.to_string(),
                    }),
                    attempts: attempt,
                };
            }

            debug!("Retrying {} in {:?}", action.name, self.config.retry_interval);
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_interval) => {}
                _ = ctx.done() => {}
            }
        }
    }

    /// One launch attempt. A container that was created but could not be
    /// started is removed before returning the error.
    async fn launch(&self, ctx: &Context, workflow_id: &str, action: &Action) -> Result<String> {
        self.manager.pull_image(ctx, &action.image).await?;

        let id = self
            .manager
            .create_container(
                ctx,
                &action.command,
                workflow_id,
                action,
                self.config.privileged,
                &self.config.action_env,
            )
            .await?;

        if let Err(e) = self.manager.start_container(ctx, &id).await {
            self.cleanup(ctx, workflow_id, &id).await;
            return Err(e);
        }
        Ok(id)
    }

    /// Waits for the started container and collects failure details.
    async fn await_exit(
        &self,
        ctx: &Context,
        workflow_id: &str,
        action: &Action,
        id: &str,
    ) -> (ContainerState, Option<FailureInfo>) {
        let timeout = action
            .timeout()
            .or_else(|| self.config.default_timeout())
            .unwrap_or(Duration::ZERO);
        let wait_ctx = ctx.with_timeout(timeout);

        let log_ctx = ctx.with_cancel();
        if self.config.capture_action_logs {
            self.capturer.capture_logs(&log_ctx, id).await;
        }

        let outcome = self.manager.wait_for_container(&wait_ctx, id).await;
        log_ctx.cancel();
        info!(workflow_id, action = %action.name, container_id = id, "Action ended {}", outcome.state);

        match outcome.state {
            ContainerState::Success => (ContainerState::Success, None),
            ContainerState::Timeout => {
                let message = match outcome.error {
                    Some(Error::Canceled) => "action was canceled".to_string(),
                    _ => format!("action did not complete within {:?}", timeout),
                };
                let failure = FailureInfo {
                    reason: TIMEOUT_FAILURE_REASON.to_string(),
                    message,
                };
                (ContainerState::Timeout, Some(failure))
            }
            state => {
                if let Some(e) = &outcome.error {
                    warn!(container_id = id, "Container could not be observed: {}", e);
                }
                let dir = report_dir(&self.config.data_dir, workflow_id, id);
                let failure = self.reader.read(&dir).await.into_failure_info();
                (state, Some(failure))
            }
        }
    }

    /// Removes the container and its report directory. Errors are logged.
    async fn cleanup(&self, ctx: &Context, workflow_id: &str, id: &str) {
        if let Err(e) = self.manager.remove_container(ctx, id).await {
            warn!(container_id = id, "Failed to remove container: {}", e);
        }

        let dir = report_dir(&self.config.data_dir, workflow_id, id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
        }
    }
}
