//! Mount assembly for action containers.
//!
//! Every container gets the union of two sets:
//!
//! 1. the **fixed** host mounts from [`FIXED_HOST_MOUNTS`], the per-workflow
//!    scratch directory at `/workflow` and the per-attempt report directory
//!    at `/tinkerbell`. These are trusted and never filtered.
//! 2. the action's declared volumes, parsed from `src:dst[:opts]` and
//!    filtered against [`MOUNT_DENY_LIST`].
//!
//! Declared volumes must be host bind mounts with an absolute source.
//! Named and anonymous volumes have no meaning on a provisioning node and
//! are rejected.

use crate::constants::{
    FIXED_HOST_MOUNTS, MOUNT_DENY_LIST, REPORT_MOUNT_DESTINATION, WORKFLOW_MOUNT_DESTINATION,
};
use crate::error::{Error, Result};
use crate::spec::OciMount;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Mode options accepted after the destination, besides `ro`/`rw`.
const PASSTHROUGH_MODES: &[&str] = &[
    "z",
    "Z",
    "nocopy",
    "shared",
    "rshared",
    "slave",
    "rslave",
    "private",
    "rprivate",
    "consistent",
    "cached",
    "delegated",
];

/// Parses one declared volume (`src:dst[:opts]`) into a bind mount.
///
/// The destination is normalized (`/var/../etc/` becomes `/etc`) before it
/// is checked against the deny-list, so aliases of a denied path are still
/// denied.
pub fn parse_volume(raw: &str) -> Result<OciMount> {
    let invalid = |reason: &str| Error::InvalidVolume {
        volume: raw.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = raw.split(':').collect();
    let (source, destination, mode) = match parts.as_slice() {
        [_] => return Err(invalid("anonymous volumes are not supported")),
        [src, dst] => (*src, *dst, None),
        [src, dst, mode] => (*src, *dst, Some(*mode)),
        _ => return Err(invalid("too many ':' separated fields")),
    };

    if source.is_empty() {
        return Err(invalid("empty source"));
    }
    if !source.starts_with('/') {
        return Err(invalid("source must be an absolute host path"));
    }
    if !destination.starts_with('/') {
        return Err(invalid("destination must be an absolute path"));
    }
    let destination = clean_path(destination);
    if destination == "/" {
        return Err(invalid("destination can't be '/'"));
    }

    let mut read_only = false;
    if let Some(mode) = mode {
        let mut seen_rw_flag = false;
        for opt in mode.split(',') {
            match opt {
                "ro" | "rw" if seen_rw_flag => {
                    return Err(invalid("conflicting ro/rw modes"));
                }
                "ro" => {
                    read_only = true;
                    seen_rw_flag = true;
                }
                "rw" => seen_rw_flag = true,
                other if PASSTHROUGH_MODES.contains(&other) => {}
                other => return Err(invalid(&format!("unknown mode '{}'", other))),
            }
        }
    }

    Ok(OciMount::bind(clean_path(source), destination, read_only))
}

/// Parses every declared volume. The first malformed entry fails the lot.
pub fn parse_volumes(volumes: &[String]) -> Result<Vec<OciMount>> {
    volumes.iter().map(|v| parse_volume(v)).collect()
}

/// Returns true if an action volume may target `destination`.
pub fn is_valid_destination(destination: &str) -> bool {
    !MOUNT_DENY_LIST.contains(&destination)
}

/// Drops action mounts whose destination is on the deny-list.
pub fn filter_denied(mounts: Vec<OciMount>) -> Vec<OciMount> {
    mounts
        .into_iter()
        .filter(|m| {
            let allowed = is_valid_destination(&m.destination);
            if !allowed {
                warn!(
                    "Dropping action volume {} -> {}: destination is reserved",
                    m.source, m.destination
                );
            }
            allowed
        })
        .collect()
}

/// Returns the fixed mounts every action container receives.
pub fn fixed_mounts(workflow_dir: &Path) -> Vec<OciMount> {
    let mut mounts: Vec<OciMount> = FIXED_HOST_MOUNTS
        .iter()
        .map(|(path, read_only)| {
            let mut mount = OciMount::bind(*path, *path, *read_only);
            if *path == "/sys" {
                mount.mount_type = "sysfs".to_string();
            }
            mount
        })
        .collect();

    mounts.push(OciMount::bind(
        workflow_dir.to_string_lossy(),
        WORKFLOW_MOUNT_DESTINATION,
        false,
    ));
    mounts
}

/// Returns the mount exposing a per-attempt report directory at
/// `/tinkerbell`.
pub fn report_mount(report_dir: &Path) -> OciMount {
    OciMount::bind(report_dir.to_string_lossy(), REPORT_MOUNT_DESTINATION, false)
}

/// Assembles the complete mount list for one action attempt.
///
/// Order: fixed mounts, report mount, then the surviving action volumes.
/// An action volume at `/tinkerbell` is mounted after the report directory
/// and therefore shadows it.
pub fn assemble_mounts(
    workflow_dir: &Path,
    report_dir: &Path,
    volumes: &[String],
) -> Result<Vec<OciMount>> {
    let mut mounts = fixed_mounts(workflow_dir);
    mounts.push(report_mount(report_dir));
    mounts.extend(filter_denied(parse_volumes(volumes)?));
    Ok(mounts)
}

/// Lexically normalizes an absolute path: collapses repeated separators,
/// drops `.` and resolves `..` without touching the filesystem.
fn clean_path(path: &str) -> String {
    let mut out = PathBuf::from("/");
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/etc/hosts/"), "/etc/hosts");
        assert_eq!(clean_path("/var/../etc//hosts"), "/etc/hosts");
        assert_eq!(clean_path("/./dev"), "/dev");
        assert_eq!(clean_path("/../.."), "/");
    }

    #[test]
    fn test_parse_volume_modes() {
        let m = parse_volume("/data:/data:ro,z").unwrap();
        assert!(m.is_read_only());
        let m = parse_volume("/data:/data").unwrap();
        assert_eq!(m.options, vec!["rbind".to_string(), "rw".to_string()]);
        assert!(parse_volume("/data:/data:ro,rw").is_err());
        assert!(parse_volume("/data:/data:bogus").is_err());
    }

    #[test]
    fn test_parse_volume_rejects_non_bind() {
        assert!(parse_volume("/data").is_err());
        assert!(parse_volume("myvolume:/data").is_err());
        assert!(parse_volume("/data:relative").is_err());
        assert!(parse_volume("/data:/").is_err());
    }
}
