//! Tests for reading failure reports left by actions.

use std::path::Path;
use tempfile::TempDir;
use tinkrun::failure::{FailureReasonReader, report_dir};
use tinkrun::{DEFAULT_MAX_FILE_SIZE, GENERIC_FAILURE_MESSAGE, GENERIC_FAILURE_REASON};

fn write(dir: &Path, name: &str, contents: &[u8]) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(name), contents).unwrap();
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_report_dir_layout() {
    let dir = report_dir(Path::new("/worker"), "wf-1", "disk-wipe-a1b2c3d4e5");
    assert_eq!(
        dir,
        Path::new("/worker/wf-1/.reports/disk-wipe-a1b2c3d4e5")
    );
}

// =============================================================================
// Reading Tests
// =============================================================================

#[tokio::test]
async fn test_reason_and_message_read() {
    let temp = TempDir::new().unwrap();
    let dir = report_dir(temp.path(), "wf", "c1");
    write(&dir, "failure-reason", b"DISK_NOT_FOUND\n");
    write(&dir, "failure-message", b"  no disk matched /dev/nvme0n1  \n");

    let report = FailureReasonReader::new(DEFAULT_MAX_FILE_SIZE).read(&dir).await;

    assert_eq!(report.reason.as_deref(), Some("DISK_NOT_FOUND"));
    assert_eq!(report.message.as_deref(), Some("no disk matched /dev/nvme0n1"));
}

#[tokio::test]
async fn test_missing_files_fall_back_to_generic() {
    let temp = TempDir::new().unwrap();
    let dir = report_dir(temp.path(), "wf", "never-written");

    let report = FailureReasonReader::new(DEFAULT_MAX_FILE_SIZE).read(&dir).await;
    assert!(report.reason.is_none());
    assert!(report.message.is_none());

    let info = report.into_failure_info();
    assert_eq!(info.reason, GENERIC_FAILURE_REASON);
    assert_eq!(info.message, GENERIC_FAILURE_MESSAGE);
}

#[tokio::test]
async fn test_blank_file_counts_as_absent() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("c1");
    write(&dir, "failure-reason", b" \n\t\n");

    let report = FailureReasonReader::new(DEFAULT_MAX_FILE_SIZE).read(&dir).await;
    assert!(report.reason.is_none());
}

#[tokio::test]
async fn test_oversized_file_truncated() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("c1");
    write(&dir, "failure-message", &vec![b'x'; 4096]);

    let report = FailureReasonReader::new(16).read(&dir).await;
    assert_eq!(report.message.unwrap().len(), 16);
}

#[tokio::test]
async fn test_non_utf8_is_lossy() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("c1");
    write(&dir, "failure-reason", b"BAD_\xffBYTES");

    let report = FailureReasonReader::new(DEFAULT_MAX_FILE_SIZE).read(&dir).await;
    let reason = report.reason.unwrap();
    assert!(reason.starts_with("BAD_"));
    assert!(reason.ends_with("BYTES"));
}
