//! tink-worker - on-node workflow action runner
//!
//! Runs one provisioning workflow on this node: every action as an isolated
//! container, in order, stopping at the first action that does not succeed.
//!
//! ## Usage
//!
//! ```sh
//! tink-worker --id <worker-id> --tinkerbell-grpc-authority <host:port> \
//!     --workflow workflow.json
//! ```
//!
//! Every flag can also be set through the environment variable named in
//! `--help`. With `--init-node`, the kernel command line is read first and
//! its settings become the environment defaults.

use anyhow::{Context as _, Result, bail};
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tinkrun::config::{RuntimeConfig, forwarded_env, init_node, parse_duration};
use tinkrun::constants::{
    DEFAULT_DATA_DIR, DEFAULT_ENGINE_ROOT, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_RETRIES,
    ENGINE_NAMESPACE, REBOOT_POLL_INTERVAL,
};
use tinkrun::{
    Context, EngineManager, NativeEngine, RebootWatcher, RegistryCredentials, StdioLogCapturer,
    TracingRecorder, Worker, Workflow,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "tink-worker", version, about = "Runs provisioning workflow actions as containers")]
struct Cli {
    /// Worker identifier
    #[arg(short = 'i', long, env = "ID")]
    id: String,

    /// Workflow server authority (host:port)
    #[arg(long, env = "TINKERBELL_GRPC_AUTHORITY")]
    tinkerbell_grpc_authority: String,

    /// Use TLS towards the workflow server
    #[arg(long, env = "TINKERBELL_TLS", default_value_t = true, action = ArgAction::Set)]
    tinkerbell_tls: bool,

    /// Registry every image is pulled from
    #[arg(short = 'r', long, env = "DOCKER_REGISTRY", default_value = "")]
    docker_registry: String,

    /// Registry user name
    #[arg(short = 'u', long, env = "REGISTRY_USERNAME", default_value = "")]
    registry_username: String,

    /// Registry password
    #[arg(short = 'p', long, env = "REGISTRY_PASSWORD", default_value = "", hide_env_values = true)]
    registry_password: String,

    /// Delay between launch attempts of an action
    #[arg(long, env = "RETRY_INTERVAL", default_value = "3s", value_parser = parse_duration)]
    retry_interval: Duration,

    /// Launch attempts per action
    #[arg(long, env = "MAX_RETRY", default_value_t = DEFAULT_MAX_RETRIES)]
    max_retry: u32,

    /// Largest number of bytes read from files an action writes
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = DEFAULT_MAX_FILE_SIZE)]
    max_file_size: u64,

    /// Capture action container output
    #[arg(long, env = "CAPTURE_ACTION_LOGS", default_value_t = true, action = ArgAction::Set)]
    capture_action_logs: bool,

    /// Timeout for actions that declare none (0 disables it)
    #[arg(long, env = "TIMEOUT", default_value = "60m", value_parser = parse_duration)]
    timeout: Duration,

    /// Workflow definition (JSON)
    #[arg(long, env = "WORKFLOW_FILE")]
    workflow: PathBuf,

    /// Host directory for workflow scratch areas
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Container engine state directory
    #[arg(long, default_value = DEFAULT_ENGINE_ROOT)]
    engine_root: PathBuf,

    /// Read the kernel command line and prepare host directories first
    #[arg(long)]
    init_node: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> ExitCode {
    let node_init = if wants_init_node(std::env::args_os()) {
        // SAFETY: no other thread exists yet; the async runtime is built
        // below.
        Some(unsafe { init_node() })
    } else {
        None
    };

    // Boot settings exported above act as environment defaults here.
    let cli = Cli::parse();

    init_tracing(cli.log_format);

    match node_init {
        Some(Ok(boot)) => info!(worker_id = %boot.worker_id, "Node initialized"),
        Some(Err(e)) => warn!("Node initialization failed: {}", e),
        None => {}
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Cannot start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Scans raw arguments for `--init-node` ahead of full parsing, since the
/// node's identity may only exist on the kernel command line.
fn wants_init_node<I, T>(args: I) -> bool
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString>,
{
    args.into_iter()
        .skip(1)
        .map(Into::into)
        .take_while(|arg| arg != "--")
        .any(|arg| arg == "--init-node")
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with((format == LogFormat::Text).then(tracing_subscriber::fmt::layer))
        .with((format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json()))
        .init();
}

/// Runs the workflow. Returns whether it succeeded.
async fn run(cli: Cli) -> Result<bool> {
    info!(
        worker_id = %cli.id,
        authority = %cli.tinkerbell_grpc_authority,
        tls = cli.tinkerbell_tls,
        "Starting tink-worker"
    );

    let raw = tokio::fs::read(&cli.workflow)
        .await
        .with_context(|| format!("reading {}", cli.workflow.display()))?;
    let workflow: Workflow = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing {}", cli.workflow.display()))?;

    let credentials = RegistryCredentials {
        registry: cli.docker_registry,
        username: cli.registry_username,
        password: cli.registry_password,
    };
    let engine = NativeEngine::new(&cli.engine_root, ENGINE_NAMESPACE, credentials)?;
    if let Some(reason) = engine.unavailable_reason() {
        bail!("container engine unavailable: {}", reason);
    }

    let config = RuntimeConfig {
        worker_id: cli.id,
        retry_interval: cli.retry_interval,
        max_retries: cli.max_retry,
        max_file_size: cli.max_file_size,
        privileged: true,
        capture_action_logs: cli.capture_action_logs,
        action_timeout: cli.timeout,
        data_dir: cli.data_dir,
        action_env: forwarded_env(),
    };
    let manager = EngineManager::new(Arc::new(engine), &config.data_dir);
    let worker = Worker::new(Arc::new(manager), config)
        .with_log_capturer(Arc::new(StdioLogCapturer))
        .with_recorder(Arc::new(TracingRecorder));

    let ctx = Context::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling workflow");
            interrupt.cancel();
        }
    });

    let reboot_ctx = ctx.with_cancel();
    let watcher_ctx = reboot_ctx.clone();
    let watcher = tokio::spawn(async move { RebootWatcher::default().watch(&watcher_ctx).await });

    let result = worker.run_workflow(&ctx, &workflow).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    // Give a reboot requested by the last action one more poll.
    if tokio::time::timeout(REBOOT_POLL_INTERVAL * 2, watcher).await.is_err() {
        reboot_ctx.cancel();
    }

    Ok(result.is_success())
}
