//! Tests for the workflow action executor.
//!
//! Drives [`Worker`] against a scripted [`ContainerManager`] to cover
//! ordering, abort on first failure, launch retries and timeouts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tinkrun::failure::report_dir;
use tinkrun::naming::new_container_name;
use tinkrun::{
    Action, ContainerManager, ContainerState, Context, Error, Event, EventRecorder,
    GENERIC_FAILURE_REASON, LAUNCH_FAILURE_REASON, LogCapturer, REJECTED_FAILURE_REASON, Result,
    RuntimeConfig, TIMEOUT_FAILURE_REASON, WaitOutcome, Worker, Workflow,
};
use tokio::sync::mpsc;

// =============================================================================
// Scripted Manager
// =============================================================================

/// How an action's container behaves once started.
#[derive(Debug, Clone, Copy)]
enum Script {
    Succeed,
    /// Exits non-zero, optionally writing a failure reason first.
    Fail(Option<&'static str>),
    /// Never exits.
    Hang,
}

#[derive(Default)]
struct FakeManager {
    data_dir: PathBuf,
    scripts: HashMap<String, Script>,
    /// Remaining pull failures per image.
    pull_failures: Mutex<HashMap<String, u32>>,
    /// Remaining start failures per action.
    start_failures: Mutex<HashMap<String, u32>>,
    /// Action name of each created container.
    containers: Mutex<HashMap<String, (String, String)>>,
    log: Mutex<Vec<String>>,
    create_args: Mutex<Vec<(bool, Vec<String>)>>,
}

impl FakeManager {
    fn new(data_dir: &TempDir) -> Self {
        Self {
            data_dir: data_dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    fn script(mut self, action: &str, script: Script) -> Self {
        self.scripts.insert(action.to_string(), script);
        self
    }

    fn failing_pulls(self, image: &str, times: u32) -> Self {
        self.pull_failures
            .lock()
            .unwrap()
            .insert(image.to_string(), times);
        self
    }

    fn failing_starts(self, action: &str, times: u32) -> Self {
        self.start_failures
            .lock()
            .unwrap()
            .insert(action.to_string(), times);
        self
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.log().iter().filter(|l| l.starts_with(prefix)).count()
    }

    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn take_failure(map: &Mutex<HashMap<String, u32>>, key: &str) -> bool {
        let mut map = map.lock().unwrap();
        match map.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ContainerManager for FakeManager {
    async fn pull_image(&self, _ctx: &Context, image: &str) -> Result<()> {
        self.push(format!("pull:{}", image));
        if Self::take_failure(&self.pull_failures, image) {
            return Err(Error::ImagePullFailed {
                reference: image.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn create_container(
        &self,
        _ctx: &Context,
        _cmd: &[String],
        workflow_id: &str,
        action: &Action,
        privileged: bool,
        extra_env: &[String],
    ) -> Result<String> {
        let id = new_container_name(&action.name);
        self.push(format!("create:{}", action.name));
        std::fs::create_dir_all(report_dir(&self.data_dir, workflow_id, &id))?;
        self.containers.lock().unwrap().insert(
            id.clone(),
            (workflow_id.to_string(), action.name.clone()),
        );
        self.create_args
            .lock()
            .unwrap()
            .push((privileged, extra_env.to_vec()));
        Ok(id)
    }

    async fn start_container(&self, _ctx: &Context, id: &str) -> Result<()> {
        let action = self.containers.lock().unwrap()[id].1.clone();
        self.push(format!("start:{}", action));
        if Self::take_failure(&self.start_failures, &action) {
            return Err(Error::StartFailed {
                id: id.to_string(),
                reason: "exec format error".to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_container(&self, ctx: &Context, id: &str) -> WaitOutcome {
        let (workflow_id, action) = self.containers.lock().unwrap()[id].clone();
        self.push(format!("wait:{}", action));
        let script = self.scripts.get(&action).copied().unwrap_or(Script::Succeed);
        match script {
            Script::Succeed => WaitOutcome {
                state: ContainerState::Success,
                error: None,
            },
            Script::Fail(reason) => {
                if let Some(reason) = reason {
                    let dir = report_dir(&self.data_dir, &workflow_id, id);
                    std::fs::write(dir.join("failure-reason"), reason).unwrap();
                }
                WaitOutcome {
                    state: ContainerState::Failed,
                    error: None,
                }
            }
            Script::Hang => WaitOutcome {
                state: ContainerState::Timeout,
                error: Some(ctx.done().await),
            },
        }
    }

    async fn wait_for_failed_container(
        &self,
        ctx: &Context,
        id: &str,
        result: mpsc::Sender<ContainerState>,
    ) {
        let outcome = self.wait_for_container(ctx, id).await;
        let _ = result.send(outcome.state).await;
    }

    async fn remove_container(&self, _ctx: &Context, id: &str) -> Result<()> {
        let action = self
            .containers
            .lock()
            .unwrap()
            .get(id)
            .map(|(_, action)| action.clone())
            .unwrap_or_default();
        self.push(format!("remove:{}", action));
        Ok(())
    }
}

#[derive(Default)]
struct CollectingRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder for CollectingRecorder {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
struct CountingCapturer {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl LogCapturer for CountingCapturer {
    async fn capture_logs(&self, _ctx: &Context, container_id: &str) {
        self.calls.lock().unwrap().push(container_id.to_string());
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn action(name: &str) -> Action {
    Action {
        name: name.to_string(),
        image: format!("registry.local/{}:latest", name),
        ..Default::default()
    }
}

fn workflow(names: &[&str]) -> Workflow {
    Workflow {
        id: "wf-1".to_string(),
        actions: names.iter().map(|n| action(n)).collect(),
    }
}

fn config(data_dir: &TempDir) -> RuntimeConfig {
    RuntimeConfig {
        retry_interval: Duration::from_millis(10),
        data_dir: data_dir.path().to_path_buf(),
        ..RuntimeConfig::new("worker-1")
    }
}

// =============================================================================
// Workflow Outcome Tests
// =============================================================================

#[tokio::test]
async fn test_all_actions_succeed_in_order() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(FakeManager::new(&temp));
    let worker = Worker::new(manager.clone(), config(&temp));

    let result = worker
        .run_workflow(&Context::background(), &workflow(&["partition", "format", "install"]))
        .await;

    assert!(result.is_success());
    assert!(result.failed_action.is_none());
    let names: Vec<&str> = result.actions.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["partition", "format", "install"]);
    assert!(result.actions.iter().all(|a| a.attempts == 1));

    let waits: Vec<String> = manager
        .log()
        .into_iter()
        .filter(|l| l.starts_with("wait:"))
        .collect();
    assert_eq!(waits, vec!["wait:partition", "wait:format", "wait:install"]);
    assert_eq!(manager.count("remove:"), 3);
}

#[tokio::test]
async fn test_failed_action_aborts_workflow_with_reason() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(
        FakeManager::new(&temp).script("action-2", Script::Fail(Some("DISK_NOT_FOUND\n"))),
    );
    let worker = Worker::new(manager.clone(), config(&temp));

    let result = worker
        .run_workflow(&Context::background(), &workflow(&["action-1", "action-2", "action-3"]))
        .await;

    assert_eq!(result.state, ContainerState::Failed);
    assert_eq!(result.failed_action.as_deref(), Some("action-2"));
    assert_eq!(result.failure.as_ref().unwrap().reason, "DISK_NOT_FOUND");

    assert_eq!(result.actions.len(), 2);
    assert_eq!(result.actions[0].state, ContainerState::Success);
    assert_eq!(result.actions[1].state, ContainerState::Failed);
    assert_eq!(result.actions[1].failure.as_ref().unwrap().reason, "DISK_NOT_FOUND");

    let log = manager.log();
    assert!(!log.iter().any(|l| l.contains("action-3")), "action-3 must never run");
    assert!(log.contains(&"remove:action-2".to_string()));
    assert_eq!(manager.count("create:action-2"), 1, "failures are never retried");

    let reports = temp.path().join("wf-1").join(".reports");
    let leftover = std::fs::read_dir(&reports).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftover, 0, "report directories must be cleaned up");
}

#[tokio::test]
async fn test_failure_without_files_gets_generic_reason() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(FakeManager::new(&temp).script("wipe", Script::Fail(None)));
    let worker = Worker::new(manager, config(&temp));

    let result = worker
        .run_workflow(&Context::background(), &workflow(&["wipe"]))
        .await;

    assert_eq!(result.state, ContainerState::Failed);
    assert_eq!(result.failure.unwrap().reason, GENERIC_FAILURE_REASON);
}

#[tokio::test]
async fn test_timeout_aborts_and_removes() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(FakeManager::new(&temp).script("stream", Script::Hang));
    let cfg = RuntimeConfig {
        action_timeout: Duration::from_millis(100),
        ..config(&temp)
    };
    let worker = Worker::new(manager.clone(), cfg);

    let result = worker
        .run_workflow(&Context::background(), &workflow(&["stream", "kexec"]))
        .await;

    assert_eq!(result.state, ContainerState::Timeout);
    assert_eq!(result.actions.len(), 1);
    assert_eq!(result.actions[0].state, ContainerState::Timeout);
    assert_eq!(result.failure.unwrap().reason, TIMEOUT_FAILURE_REASON);

    let log = manager.log();
    assert!(log.contains(&"remove:stream".to_string()));
    assert!(!log.iter().any(|l| l.contains("kexec")));
    assert_eq!(manager.count("create:"), 1, "timeouts are never retried");
}

#[tokio::test]
async fn test_action_timeout_overrides_default() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(FakeManager::new(&temp).script("stream", Script::Hang));
    let cfg = RuntimeConfig {
        action_timeout: Duration::from_secs(3600),
        ..config(&temp)
    };
    let worker = Worker::new(manager, cfg);

    let mut wf = workflow(&["stream"]);
    wf.actions[0].timeout = 1;
    let start = Instant::now();
    let result = worker.run_workflow(&Context::background(), &wf).await;

    assert_eq!(result.state, ContainerState::Timeout);
    assert!(start.elapsed() < Duration::from_secs(30));
}

// =============================================================================
// Retry Tests
// =============================================================================

#[tokio::test]
async fn test_pull_retried_until_success() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(FakeManager::new(&temp).failing_pulls("registry.local/disk:latest", 2));
    let cfg = RuntimeConfig {
        max_retries: 3,
        retry_interval: Duration::from_secs(1),
        ..config(&temp)
    };
    let worker = Worker::new(manager.clone(), cfg);

    let start = Instant::now();
    let result = worker
        .run_workflow(&Context::background(), &workflow(&["disk"]))
        .await;
    let elapsed = start.elapsed();

    assert!(result.is_success());
    assert_eq!(manager.count("pull:"), 3);
    assert_eq!(result.actions[0].attempts, 3);
    assert!(elapsed >= Duration::from_millis(1900), "elapsed {:?}", elapsed);

    let log = manager.log();
    let after_pulls: Vec<&str> = log.iter().skip(3).map(|s| s.as_str()).collect();
    assert_eq!(after_pulls, vec!["create:disk", "start:disk", "wait:disk", "remove:disk"]);
}

#[tokio::test]
async fn test_retries_exhausted_fails_workflow() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(
        FakeManager::new(&temp)
            .failing_pulls("registry.local/disk:latest", u32::MAX)
            .script("never", Script::Succeed),
    );
    let worker = Worker::new(manager.clone(), config(&temp));

    let result = worker
        .run_workflow(&Context::background(), &workflow(&["disk", "never"]))
        .await;

    assert_eq!(result.state, ContainerState::Failed);
    let report = &result.actions[0];
    assert_eq!(report.attempts, 3);
    assert!(report.container_id.is_none());
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.reason, LAUNCH_FAILURE_REASON);
    assert!(failure.message.contains("connection refused"));

    assert_eq!(manager.count("pull:"), 3);
    assert_eq!(manager.count("create:"), 0);
    assert_eq!(result.actions.len(), 1);
}

#[tokio::test]
async fn test_start_failure_removes_container_then_retries() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(FakeManager::new(&temp).failing_starts("disk", 1));
    let worker = Worker::new(manager.clone(), config(&temp));

    let result = worker
        .run_workflow(&Context::background(), &workflow(&["disk"]))
        .await;

    assert!(result.is_success());
    assert_eq!(result.actions[0].attempts, 2);
    assert_eq!(
        manager.log(),
        vec![
            "pull:registry.local/disk:latest",
            "create:disk",
            "start:disk",
            "remove:disk",
            "pull:registry.local/disk:latest",
            "create:disk",
            "start:disk",
            "wait:disk",
            "remove:disk",
        ]
    );
}

#[tokio::test]
async fn test_cancelled_workflow_stops_retrying() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(FakeManager::new(&temp).failing_pulls("registry.local/disk:latest", u32::MAX));
    let cfg = RuntimeConfig {
        max_retries: 100,
        retry_interval: Duration::from_secs(3600),
        ..config(&temp)
    };
    let worker = Worker::new(manager.clone(), cfg);
    let ctx = Context::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = worker.run_workflow(&ctx, &workflow(&["disk"])).await;

    assert_eq!(result.state, ContainerState::Failed);
    assert!(manager.count("pull:") <= 2);
}

// =============================================================================
// Policy Tests
// =============================================================================

#[tokio::test]
async fn test_privileged_and_extra_env_passed_to_create() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(FakeManager::new(&temp));
    let cfg = RuntimeConfig {
        action_env: vec!["HTTPS_PROXY=http://proxy:3128".to_string()],
        ..config(&temp)
    };
    let worker = Worker::new(manager.clone(), cfg);

    worker
        .run_workflow(&Context::background(), &workflow(&["disk"]))
        .await;

    let args = manager.create_args.lock().unwrap().clone();
    assert_eq!(
        args,
        vec![(true, vec!["HTTPS_PROXY=http://proxy:3128".to_string()])]
    );
}

#[tokio::test]
async fn test_log_capture_follows_config() {
    let temp = TempDir::new().unwrap();
    let capturer = Arc::new(CountingCapturer::default());
    let worker = Worker::new(Arc::new(FakeManager::new(&temp)), config(&temp))
        .with_log_capturer(capturer.clone());
    worker
        .run_workflow(&Context::background(), &workflow(&["a", "b"]))
        .await;
    assert_eq!(capturer.calls.lock().unwrap().len(), 2);

    let capturer = Arc::new(CountingCapturer::default());
    let cfg = RuntimeConfig {
        capture_action_logs: false,
        ..config(&temp)
    };
    let worker =
        Worker::new(Arc::new(FakeManager::new(&temp)), cfg).with_log_capturer(capturer.clone());
    worker
        .run_workflow(&Context::background(), &workflow(&["a"]))
        .await;
    assert!(capturer.calls.lock().unwrap().is_empty());
}

// =============================================================================
// Validation and Event Tests
// =============================================================================

#[tokio::test]
async fn test_malformed_workflow_rejected_before_running() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(FakeManager::new(&temp));
    let recorder = Arc::new(CollectingRecorder::default());
    let worker = Worker::new(manager.clone(), config(&temp)).with_recorder(recorder.clone());

    let mut wf = workflow(&["ok", "broken"]);
    wf.actions[1].image.clear();
    let result = worker.run_workflow(&Context::background(), &wf).await;

    assert_eq!(result.state, ContainerState::Failed);
    assert!(result.actions.is_empty());
    assert_eq!(result.failure.unwrap().reason, REJECTED_FAILURE_REASON);
    assert!(manager.log().is_empty());

    let events = recorder.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Event::WorkflowRejected { .. }));
}

#[tokio::test]
async fn test_events_recorded_per_action() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(FakeManager::new(&temp).script("b", Script::Fail(Some("BAD"))));
    let recorder = Arc::new(CollectingRecorder::default());
    let worker = Worker::new(manager, config(&temp)).with_recorder(recorder.clone());

    worker
        .run_workflow(&Context::background(), &workflow(&["a", "b", "c"]))
        .await;

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events.len(), 4);
    assert!(matches!(&events[0], Event::ActionStarted { action, .. } if action == "a"));
    assert!(matches!(&events[1], Event::ActionSucceeded { action, .. } if action == "a"));
    assert!(matches!(&events[2], Event::ActionStarted { action, .. } if action == "b"));
    match &events[3] {
        Event::ActionFailed {
            workflow_id,
            action,
            failure,
        } => {
            assert_eq!(workflow_id, "wf-1");
            assert_eq!(action, "b");
            assert_eq!(failure.reason, "BAD");
        }
        other => panic!("unexpected event {:?}", other),
    }
}
