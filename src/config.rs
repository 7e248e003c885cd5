//! Runtime configuration and node bootstrap.
//!
//! Two sources feed the worker:
//!
//! - [`RuntimeConfig`]: policy knobs of the action executor, built by the
//!   binary from flags and environment.
//! - [`BootConfig`]: `key=value` tokens from the kernel command line, the
//!   way a provisioning boot image hands the worker its registry, server
//!   and proxy settings. [`init_node`] parses them once and exports them as
//!   process environment before anything else reads it.

use crate::constants::{
    DEFAULT_ACTION_TIMEOUT, DEFAULT_DATA_DIR, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_INTERVAL, KERNEL_CMDLINE_PATH, REQUIRED_HOST_DIRS,
};
use crate::error::{Error, Result};
use crate::registry::RegistryCredentials;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variables forwarded into every action container when set.
const FORWARDED_ENV: &[&str] = &["HTTP_PROXY", "HTTPS_PROXY", "NO_PROXY"];

// =============================================================================
// Runtime Config
// =============================================================================

/// Policy for executing a workflow's actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Identifier of this worker.
    pub worker_id: String,
    /// Fixed delay between launch attempts.
    pub retry_interval: Duration,
    /// Launch attempts per action.
    pub max_retries: u32,
    /// Cap on bytes read from action-written files.
    pub max_file_size: u64,
    /// Run actions privileged.
    pub privileged: bool,
    /// Capture action container output.
    pub capture_action_logs: bool,
    /// Timeout for actions that declare none. Zero disables it.
    pub action_timeout: Duration,
    /// Host directory for per-workflow scratch areas.
    pub data_dir: PathBuf,
    /// `NAME=value` entries added to every action's environment.
    pub action_env: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_id: String::new(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            privileged: true,
            capture_action_logs: true,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            action_env: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Creates a config with defaults for the given worker.
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }

    /// Returns the default action timeout, or `None` if disabled.
    pub fn default_timeout(&self) -> Option<Duration> {
        (!self.action_timeout.is_zero()).then_some(self.action_timeout)
    }

    /// Returns the number of launch attempts, at least one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Returns `NAME=value` for each forwarded variable set in this process.
pub fn forwarded_env() -> Vec<String> {
    FORWARDED_ENV
        .iter()
        .filter_map(|name| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .map(|v| format!("{}={}", name, v))
        })
        .collect()
}

/// Parses a duration such as `3s`, `500ms`, `60m` or `1h30m`.
///
/// A bare number is read as seconds. `0` is a zero duration.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration '{}'", raw))?;
        if digits == 0 {
            return Err(format!("invalid duration '{}'", raw));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration '{}'", raw))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let overflow = || format!("duration '{}' overflows", raw);
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(overflow)?),
            "h" => Duration::from_secs(value.checked_mul(60 * 60).ok_or_else(overflow)?),
            unit => return Err(format!("unknown unit '{}' in duration '{}'", unit, raw)),
        };
        total = total.checked_add(part).ok_or_else(overflow)?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

// =============================================================================
// Boot Config
// =============================================================================

/// Settings carried on the kernel command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootConfig {
    pub registry: String,
    pub username: String,
    pub password: String,
    pub grpc_authority: String,
    pub worker_id: String,
    pub tink_worker_image: String,
    pub tinkerbell_tls: String,
    pub tinkerbell_insecure_tls: String,
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
}

impl BootConfig {
    /// Parses a whitespace-separated command line.
    ///
    /// Only allow-listed keys are read. Tokens without `=` and unknown keys
    /// are ignored; values may contain `=`.
    pub fn parse(cmdline: &str) -> Self {
        let mut cfg = Self::default();
        for token in cmdline.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let slot = match key {
                "docker_registry" => &mut cfg.registry,
                "registry_username" => &mut cfg.username,
                "registry_password" => &mut cfg.password,
                "grpc_authority" => &mut cfg.grpc_authority,
                "worker_id" => &mut cfg.worker_id,
                "tink_worker_image" => &mut cfg.tink_worker_image,
                "tinkerbell_tls" => &mut cfg.tinkerbell_tls,
                "tinkerbell_insecure_tls" => &mut cfg.tinkerbell_insecure_tls,
                "HTTP_PROXY" => &mut cfg.http_proxy,
                "HTTPS_PROXY" => &mut cfg.https_proxy,
                "NO_PROXY" => &mut cfg.no_proxy,
                _ => continue,
            };
            *slot = value.to_string();
        }
        cfg
    }

    /// Returns the process environment this config exports.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("DOCKER_REGISTRY", self.registry.clone()),
            ("REGISTRY_USERNAME", self.username.clone()),
            ("REGISTRY_PASSWORD", self.password.clone()),
            ("TINKERBELL_GRPC_AUTHORITY", self.grpc_authority.clone()),
            ("TINKERBELL_TLS", self.tinkerbell_tls.clone()),
            ("TINKERBELL_INSECURE_TLS", self.tinkerbell_insecure_tls.clone()),
            ("WORKER_ID", self.worker_id.clone()),
            ("ID", self.worker_id.clone()),
            ("HTTP_PROXY", self.http_proxy.clone()),
            ("HTTPS_PROXY", self.https_proxy.clone()),
            ("NO_PROXY", self.no_proxy.clone()),
        ]
    }

    /// Returns the registry credentials carried by the command line.
    pub fn registry_credentials(&self) -> RegistryCredentials {
        RegistryCredentials {
            registry: self.registry.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

// =============================================================================
// Node Bootstrap
// =============================================================================

/// Ensures `path` is a directory, creating it (mode `0755`) if missing.
pub fn ensure_folder(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            debug!("{} already exists", path.display());
            Ok(())
        }
        Ok(_) => Err(Error::StorageInitFailed {
            path: path.to_path_buf(),
            reason: "exists but is not a directory".to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_dir(path).map_err(|e| Error::StorageInitFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            info!("Created {} (0755)", path.display());
            Ok(())
        }
        Err(e) => Err(Error::StorageInitFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(unix)]
fn create_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
}

#[cfg(not(unix))]
fn create_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

/// Sets each variable with a non-empty value in the process environment.
/// Empty values leave any existing variable untouched.
///
/// # Safety
///
/// Must be called while the process is single-threaded (before any async
/// runtime or other thread is started).
pub unsafe fn export_env(vars: &[(&str, String)]) {
    for (name, value) in vars {
        if value.is_empty() {
            continue;
        }
        // SAFETY: the caller guarantees no other thread reads or writes the
        // environment concurrently.
        unsafe { std::env::set_var(name, value) };
    }
}

/// Prepares the node: creates the required host directories, reads the
/// kernel command line and exports it as process environment.
///
/// # Safety
///
/// Same contract as [`export_env`].
pub unsafe fn init_node() -> Result<BootConfig> {
    for dir in REQUIRED_HOST_DIRS {
        ensure_folder(Path::new(dir))?;
    }

    let cmdline = std::fs::read_to_string(KERNEL_CMDLINE_PATH)?;
    let boot = BootConfig::parse(&cmdline);

    // SAFETY: forwarded from this function's contract.
    unsafe { export_env(&boot.env_vars()) };

    info!("Node initialized from {}", KERNEL_CMDLINE_PATH);
    Ok(boot)
}
