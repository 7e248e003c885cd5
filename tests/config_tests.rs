//! Tests for runtime configuration and node bootstrap.

use std::time::Duration;
use tempfile::TempDir;
use tinkrun::config::{BootConfig, RuntimeConfig, ensure_folder, parse_duration};

// =============================================================================
// Boot Command Line Tests
// =============================================================================

#[test]
fn test_boot_tokens_parsed() {
    let cfg = BootConfig::parse("docker_registry=r.example worker_id=w1 HTTP_PROXY=h HTTPS_PROXY=hs");

    assert_eq!(cfg.registry, "r.example");
    assert_eq!(cfg.worker_id, "w1");
    assert_eq!(cfg.http_proxy, "h");
    assert_eq!(cfg.https_proxy, "hs");
    assert_eq!(cfg.no_proxy, "");
    assert_eq!(cfg.grpc_authority, "");
}

#[test]
fn test_tokens_without_equals_ignored() {
    let cfg = BootConfig::parse("ro quiet console=ttyS0 worker_id=w2 splash");

    assert_eq!(
        cfg,
        BootConfig {
            worker_id: "w2".to_string(),
            ..Default::default()
        }
    );
}

#[test]
fn test_unknown_and_miscased_keys_ignored() {
    let cfg = BootConfig::parse("DOCKER_REGISTRY=nope http_proxy=nope root=/dev/ram0");
    assert_eq!(cfg, BootConfig::default());
}

#[test]
fn test_full_command_line() {
    let cmdline = "BOOT_IMAGE=/vmlinuz ip=dhcp docker_registry=10.1.1.1 \
        registry_username=admin registry_password=s3cr=t grpc_authority=10.1.1.1:42113 \
        worker_id=00:11:22:33:44:55 tink_worker_image=quay.io/tinkerbell/tink-worker:latest \
        tinkerbell_tls=false tinkerbell_insecure_tls=true NO_PROXY=10.0.0.0/8\n";
    let cfg = BootConfig::parse(cmdline);

    assert_eq!(cfg.username, "admin");
    assert_eq!(cfg.password, "s3cr=t");
    assert_eq!(cfg.grpc_authority, "10.1.1.1:42113");
    assert_eq!(cfg.worker_id, "00:11:22:33:44:55");
    assert_eq!(cfg.tink_worker_image, "quay.io/tinkerbell/tink-worker:latest");
    assert_eq!(cfg.tinkerbell_tls, "false");
    assert_eq!(cfg.tinkerbell_insecure_tls, "true");
    assert_eq!(cfg.no_proxy, "10.0.0.0/8");

    let creds = cfg.registry_credentials();
    assert!(creds.is_configured());
    assert_eq!(creds.registry, "10.1.1.1");
}

#[test]
fn test_env_export_order() {
    let cfg = BootConfig::parse("worker_id=w1 docker_registry=r");
    let names: Vec<&str> = cfg.env_vars().iter().map(|(name, _)| *name).collect();

    assert_eq!(
        names,
        vec![
            "DOCKER_REGISTRY",
            "REGISTRY_USERNAME",
            "REGISTRY_PASSWORD",
            "TINKERBELL_GRPC_AUTHORITY",
            "TINKERBELL_TLS",
            "TINKERBELL_INSECURE_TLS",
            "WORKER_ID",
            "ID",
            "HTTP_PROXY",
            "HTTPS_PROXY",
            "NO_PROXY",
        ]
    );

    let vars = cfg.env_vars();
    let id = vars.iter().find(|(name, _)| *name == "ID").unwrap();
    assert_eq!(id.1, "w1");
}

// =============================================================================
// Runtime Config Tests
// =============================================================================

#[test]
fn test_runtime_defaults() {
    let cfg = RuntimeConfig::default();

    assert_eq!(cfg.attempts(), 3);
    assert_eq!(cfg.data_dir, std::path::PathBuf::from("/worker"));
    assert!(cfg.action_env.is_empty());
}

#[test]
fn test_zero_retries_still_attempts_once() {
    let cfg = RuntimeConfig {
        max_retries: 0,
        ..RuntimeConfig::new("w1")
    };
    assert_eq!(cfg.attempts(), 1);
}

#[test]
fn test_flag_durations() {
    assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
    assert_eq!(parse_duration("60m").unwrap(), Duration::from_secs(3600));
    assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
}

// =============================================================================
// Folder Tests
// =============================================================================

#[test]
fn test_ensure_folder_creates_missing() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("worker").join("wf-1");

    ensure_folder(&dir).unwrap();
    assert!(dir.is_dir());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & 0o700, 0o700);
    }
}

#[test]
fn test_ensure_folder_accepts_existing() {
    let temp = TempDir::new().unwrap();
    ensure_folder(temp.path()).unwrap();
    ensure_folder(temp.path()).unwrap();
}

#[test]
fn test_ensure_folder_rejects_file() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("worker");
    std::fs::write(&file, b"not a directory").unwrap();

    let err = ensure_folder(&file).unwrap_err();
    assert!(err.to_string().contains("not a directory"));
}
