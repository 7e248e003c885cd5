//! OCI runtime specification types and the action spec builder.
//!
//! [`SpecBuilder`] starts from the engine's default Linux spec and layers
//! options on top, in the order the caller applies them:
//!
//! ```rust,ignore
//! let spec = SpecBuilder::new()
//!     .with_default_unix_devices()
//!     .with_image_config(&image.config)
//!     .with_env(&action.environment)
//!     .with_mounts(mounts)
//!     .with_capabilities(&["CAP_SYS_ADMIN"])
//!     .with_host_namespace(NamespaceType::Network)
//!     .with_host_hosts_file()
//!     .with_host_resolv_conf()
//!     .with_privileged()
//!     .build();
//! ```
//!
//! Later options win: `with_env` replaces variables of the same name set by
//! the image, and `with_privileged` widens capabilities set earlier.

use crate::constants::OCI_RUNTIME_SPEC_VERSION;
use crate::registry::ImageConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// `PATH` of the default spec.
const DEFAULT_PATH_ENV: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Capabilities granted by the default spec.
const DEFAULT_CAPABILITIES: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_FSETID",
    "CAP_FOWNER",
    "CAP_MKNOD",
    "CAP_NET_RAW",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETFCAP",
    "CAP_SETPCAP",
    "CAP_NET_BIND_SERVICE",
    "CAP_SYS_CHROOT",
    "CAP_KILL",
    "CAP_AUDIT_WRITE",
];

/// Every capability known to the runtime, granted in privileged mode.
const ALL_CAPABILITIES: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETPCAP",
    "CAP_LINUX_IMMUTABLE",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_ADMIN",
    "CAP_NET_RAW",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_SYS_MODULE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_CHROOT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_PACCT",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_NICE",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_MKNOD",
    "CAP_LEASE",
    "CAP_AUDIT_WRITE",
    "CAP_AUDIT_CONTROL",
    "CAP_SETFCAP",
    "CAP_MAC_OVERRIDE",
    "CAP_MAC_ADMIN",
    "CAP_SYSLOG",
    "CAP_WAKE_ALARM",
    "CAP_BLOCK_SUSPEND",
    "CAP_AUDIT_READ",
    "CAP_PERFMON",
    "CAP_BPF",
    "CAP_CHECKPOINT_RESTORE",
];

const DEFAULT_MASKED_PATHS: &[&str] = &[
    "/proc/acpi",
    "/proc/asound",
    "/proc/kcore",
    "/proc/keys",
    "/proc/latency_stats",
    "/proc/timer_list",
    "/proc/timer_stats",
    "/proc/sched_debug",
    "/sys/firmware",
    "/sys/devices/virtual/powercap",
    "/proc/scsi",
];

const DEFAULT_READONLY_PATHS: &[&str] = &[
    "/proc/bus",
    "/proc/fs",
    "/proc/irq",
    "/proc/sys",
    "/proc/sysrq-trigger",
];

/// `/dev` subtrees skipped when copying host devices.
const HOST_DEVICE_SKIP: &[&str] = &["/dev/pts", "/dev/shm", "/dev/mqueue", "/dev/fd"];

// =============================================================================
// OCI Runtime Spec Types
// =============================================================================

/// OCI Runtime Spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciSpec {
    pub oci_version: String,
    pub root: OciRoot,
    pub process: OciProcess,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    pub mounts: Vec<OciMount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux: Option<OciLinux>,
}

/// OCI root filesystem config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciRoot {
    pub path: String,
    pub readonly: bool,
}

/// OCI process config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciProcess {
    pub terminal: bool,
    pub user: OciUser,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<OciCapabilities>,
    #[serde(default)]
    pub rlimits: Vec<OciRlimit>,
    #[serde(default)]
    pub no_new_privileges: bool,
}

/// OCI user config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciUser {
    pub uid: u32,
    pub gid: u32,
}

/// OCI process capability sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OciCapabilities {
    pub bounding: Vec<String>,
    pub effective: Vec<String>,
    pub permitted: Vec<String>,
    #[serde(default)]
    pub ambient: Vec<String>,
}

impl OciCapabilities {
    fn from_names(names: &[&str]) -> Self {
        let caps: Vec<String> = names.iter().map(|c| c.to_string()).collect();
        Self {
            bounding: caps.clone(),
            effective: caps.clone(),
            permitted: caps,
            ambient: Vec::new(),
        }
    }

    /// Returns true if the capability is in the effective set.
    pub fn has(&self, cap: &str) -> bool {
        self.effective.iter().any(|c| c == cap)
    }
}

/// OCI rlimit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciRlimit {
    #[serde(rename = "type")]
    pub rlimit_type: String,
    pub hard: u64,
    pub soft: u64,
}

/// OCI mount config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciMount {
    pub destination: String,
    #[serde(rename = "type")]
    pub mount_type: String,
    pub source: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl OciMount {
    /// Creates a recursive bind mount of `source` at `destination`.
    pub fn bind(source: impl Into<String>, destination: impl Into<String>, read_only: bool) -> Self {
        Self {
            destination: destination.into(),
            mount_type: "bind".to_string(),
            source: source.into(),
            options: vec![
                "rbind".to_string(),
                if read_only { "ro" } else { "rw" }.to_string(),
            ],
        }
    }

    /// Returns true if the mount carries the `ro` option.
    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|o| o == "ro")
    }

    fn with_options(destination: &str, mount_type: &str, source: &str, options: &[&str]) -> Self {
        Self {
            destination: destination.to_string(),
            mount_type: mount_type.to_string(),
            source: source.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }
}

/// OCI Linux-specific config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciLinux {
    pub namespaces: Vec<OciNamespace>,
    #[serde(default)]
    pub devices: Vec<OciDevice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<OciResources>,
    #[serde(default)]
    pub masked_paths: Vec<String>,
    #[serde(default)]
    pub readonly_paths: Vec<String>,
}

/// Namespace kinds the builder manipulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceType {
    Pid,
    Network,
    Ipc,
    Uts,
    Mount,
}

impl NamespaceType {
    /// Returns the OCI name of the namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pid => "pid",
            Self::Network => "network",
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::Mount => "mount",
        }
    }
}

/// OCI namespace config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciNamespace {
    #[serde(rename = "type")]
    pub ns_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// OCI device node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciDevice {
    pub path: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub major: i64,
    pub minor: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

/// OCI resource limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OciResources {
    #[serde(default)]
    pub devices: Vec<OciDeviceCgroup>,
}

/// OCI device cgroup rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciDeviceCgroup {
    pub allow: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
}

impl OciDeviceCgroup {
    fn char_device(major: i64, minor: i64) -> Self {
        Self {
            allow: true,
            device_type: Some("c".to_string()),
            major: Some(major),
            minor: Some(minor),
            access: Some("rwm".to_string()),
        }
    }
}

// =============================================================================
// Spec Builder
// =============================================================================

/// Builds the OCI runtime spec for one action container.
#[derive(Debug, Clone)]
pub struct SpecBuilder {
    spec: OciSpec,
}

impl SpecBuilder {
    /// Starts from the default Linux spec.
    pub fn new() -> Self {
        Self {
            spec: default_spec(),
        }
    }

    /// Sets the root filesystem path (absolute, or relative to the bundle).
    pub fn with_root(mut self, path: &Path) -> Self {
        self.spec.root.path = path.to_string_lossy().to_string();
        self
    }

    /// Adds the standard character devices (`null`, `zero`, `random`, ...).
    pub fn with_default_unix_devices(mut self) -> Self {
        let linux = self.linux_mut();
        for (path, major, minor) in [
            ("/dev/null", 1, 3),
            ("/dev/random", 1, 8),
            ("/dev/full", 1, 7),
            ("/dev/tty", 5, 0),
            ("/dev/zero", 1, 5),
            ("/dev/urandom", 1, 9),
        ] {
            linux.devices.push(OciDevice {
                path: path.to_string(),
                device_type: "c".to_string(),
                major,
                minor,
                file_mode: Some(0o666),
                uid: Some(0),
                gid: Some(0),
            });
            linux
                .resources
                .get_or_insert_with(OciResources::default)
                .devices
                .push(OciDeviceCgroup::char_device(major, minor));
        }
        self
    }

    /// Applies the image's own environment, command and working directory.
    pub fn with_image_config(mut self, config: &ImageConfig) -> Self {
        self = self.with_env(&config.env);

        let mut args = config.entrypoint.clone();
        args.extend(config.cmd.iter().cloned());
        self.spec.process.args = args;

        self.spec.process.cwd = match config.working_dir.as_deref() {
            Some(dir) if !dir.is_empty() => dir.to_string(),
            _ => "/".to_string(),
        };

        if let Some(user) = config.user.as_deref().filter(|u| !u.is_empty()) {
            match parse_numeric_user(user) {
                Some((uid, gid)) => self.spec.process.user = OciUser { uid, gid },
                None => debug!("Image user '{}' is resolved against the rootfs", user),
            }
        }
        self
    }

    /// Sets environment variables, replacing any already set with the same
    /// name and appending the rest in order.
    pub fn with_env(mut self, env: &[String]) -> Self {
        for entry in env {
            let key = entry.split_once('=').map_or(entry.as_str(), |(k, _)| k);
            let existing = self
                .spec
                .process
                .env
                .iter_mut()
                .find(|e| e.split_once('=').map_or(e.as_str(), |(k, _)| k) == key);
            match existing {
                Some(slot) => *slot = entry.clone(),
                None => self.spec.process.env.push(entry.clone()),
            }
        }
        self
    }

    /// Appends mounts after the default ones.
    pub fn with_mounts(mut self, mounts: Vec<OciMount>) -> Self {
        self.spec.mounts.extend(mounts);
        self
    }

    /// Replaces the process capability sets.
    pub fn with_capabilities(mut self, caps: &[&str]) -> Self {
        self.spec.process.capabilities = Some(OciCapabilities::from_names(caps));
        self
    }

    /// Joins the host's namespace of the given type (removes it from the
    /// spec's namespace list).
    pub fn with_host_namespace(mut self, ns: NamespaceType) -> Self {
        self.linux_mut().namespaces.retain(|n| n.ns_type != ns.as_str());
        self
    }

    /// Bind-mounts the host's `/etc/hosts` read-only.
    pub fn with_host_hosts_file(self) -> Self {
        self.with_host_file("/etc/hosts")
    }

    /// Bind-mounts the host's `/etc/resolv.conf` read-only.
    pub fn with_host_resolv_conf(self) -> Self {
        self.with_host_file("/etc/resolv.conf")
    }

    fn with_host_file(mut self, path: &str) -> Self {
        self.spec.mounts.push(OciMount::bind(path, path, true));
        self
    }

    /// Grants every capability and removes path masking.
    pub fn with_privileged(mut self) -> Self {
        self.spec.process.capabilities = Some(OciCapabilities::from_names(ALL_CAPABILITIES));
        self.spec.process.no_new_privileges = false;
        for mount in &mut self.spec.mounts {
            if mount.mount_type == "sysfs" || mount.mount_type == "cgroup" {
                mount.options.retain(|o| o != "ro");
                if !mount.options.iter().any(|o| o == "rw") {
                    mount.options.push("rw".to_string());
                }
            }
        }
        let linux = self.linux_mut();
        linux.masked_paths.clear();
        linux.readonly_paths.clear();
        self
    }

    /// Allows access to every device through the device cgroup.
    pub fn with_all_devices_allowed(mut self) -> Self {
        self.linux_mut().resources = Some(OciResources {
            devices: vec![OciDeviceCgroup {
                allow: true,
                device_type: None,
                major: None,
                minor: None,
                access: Some("rwm".to_string()),
            }],
        });
        self
    }

    /// Copies every device node under the host's `/dev` into the spec.
    ///
    /// Unreadable entries are skipped.
    pub fn with_host_devices(self) -> Self {
        self.with_devices_from(Path::new("/dev"))
    }

    /// Copies every device node under `dir` into the spec.
    pub fn with_devices_from(mut self, dir: &Path) -> Self {
        let mut devices = Vec::new();
        collect_devices(dir, &mut devices);
        let linux = self.linux_mut();
        for device in devices {
            if !linux.devices.iter().any(|d| d.path == device.path) {
                linux.devices.push(device);
            }
        }
        self
    }

    /// Overrides the process arguments.
    pub fn with_process_args(mut self, args: &[String]) -> Self {
        self.spec.process.args = args.to_vec();
        self
    }

    /// Sets the container hostname.
    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.spec.hostname = hostname.to_string();
        self
    }

    /// Returns the finished spec.
    pub fn build(self) -> OciSpec {
        self.spec
    }

    fn linux_mut(&mut self) -> &mut OciLinux {
        self.spec.linux.get_or_insert_with(|| OciLinux {
            namespaces: Vec::new(),
            devices: Vec::new(),
            resources: None,
            masked_paths: Vec::new(),
            readonly_paths: Vec::new(),
        })
    }
}

impl Default for SpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the default Linux spec every container starts from.
fn default_spec() -> OciSpec {
    OciSpec {
        oci_version: OCI_RUNTIME_SPEC_VERSION.to_string(),
        root: OciRoot {
            path: "rootfs".to_string(),
            readonly: false,
        },
        process: OciProcess {
            terminal: false,
            user: OciUser { uid: 0, gid: 0 },
            args: Vec::new(),
            env: vec![DEFAULT_PATH_ENV.to_string()],
            cwd: "/".to_string(),
            capabilities: Some(OciCapabilities::from_names(DEFAULT_CAPABILITIES)),
            rlimits: vec![OciRlimit {
                rlimit_type: "RLIMIT_NOFILE".to_string(),
                hard: 1024,
                soft: 1024,
            }],
            no_new_privileges: true,
        },
        hostname: String::new(),
        mounts: vec![
            OciMount::with_options("/proc", "proc", "proc", &["nosuid", "noexec", "nodev"]),
            OciMount::with_options(
                "/dev",
                "tmpfs",
                "tmpfs",
                &["nosuid", "strictatime", "mode=755", "size=65536k"],
            ),
            OciMount::with_options(
                "/dev/pts",
                "devpts",
                "devpts",
                &["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620", "gid=5"],
            ),
            OciMount::with_options(
                "/dev/shm",
                "tmpfs",
                "shm",
                &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"],
            ),
            OciMount::with_options("/dev/mqueue", "mqueue", "mqueue", &["nosuid", "noexec", "nodev"]),
            OciMount::with_options("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"]),
            OciMount::with_options(
                "/run",
                "tmpfs",
                "tmpfs",
                &["nosuid", "strictatime", "mode=755", "size=65536k"],
            ),
        ],
        linux: Some(OciLinux {
            namespaces: [
                NamespaceType::Pid,
                NamespaceType::Ipc,
                NamespaceType::Uts,
                NamespaceType::Mount,
                NamespaceType::Network,
            ]
            .iter()
            .map(|ns| OciNamespace {
                ns_type: ns.as_str().to_string(),
                path: None,
            })
            .collect(),
            devices: Vec::new(),
            resources: Some(OciResources {
                devices: vec![OciDeviceCgroup {
                    allow: false,
                    device_type: None,
                    major: None,
                    minor: None,
                    access: Some("rwm".to_string()),
                }],
            }),
            masked_paths: DEFAULT_MASKED_PATHS.iter().map(|p| p.to_string()).collect(),
            readonly_paths: DEFAULT_READONLY_PATHS.iter().map(|p| p.to_string()).collect(),
        }),
    }
}

/// Parses `uid` or `uid:gid`.
/// Resolves an image `User` value against the image's own `/etc/passwd`
/// and `/etc/group`.
///
/// Accepts `user`, `uid`, `user:group` and `uid:gid` (and mixes). Without a
/// group the user's primary group applies, or gid 0 for a uid with no
/// passwd entry. Names that cannot be found are an error.
pub fn resolve_user(rootfs: &Path, user: &str) -> std::result::Result<OciUser, String> {
    if let Some((uid, gid)) = parse_numeric_user(user)
        && user.contains(':')
    {
        return Ok(OciUser { uid, gid });
    }

    let (user_part, group_part) = match user.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (user, None),
    };

    let passwd = read_rootfs_file(rootfs, "etc/passwd")?.unwrap_or_default();
    let (uid, primary_gid) = match user_part.parse::<u32>() {
        Ok(uid) => {
            let gid = id_entries(&passwd)
                .find(|(_, id, _)| *id == uid)
                .map_or(0, |(_, _, gid)| gid);
            (uid, gid)
        }
        Err(_) => id_entries(&passwd)
            .find(|(name, _, _)| *name == user_part)
            .map(|(_, uid, gid)| (uid, gid))
            .ok_or_else(|| format!("no user '{}' in /etc/passwd", user_part))?,
    };

    let gid = match group_part {
        None => primary_gid,
        Some(group) => match group.parse::<u32>() {
            Ok(gid) => gid,
            Err(_) => {
                let groups = read_rootfs_file(rootfs, "etc/group")?.unwrap_or_default();
                id_entries(&groups)
                    .find(|(name, _, _)| *name == group)
                    .map(|(_, gid, _)| gid)
                    .ok_or_else(|| format!("no group '{}' in /etc/group", group))?
            }
        },
    };

    Ok(OciUser { uid, gid })
}

/// Yields `(name, id, next id)` from passwd-style lines.
///
/// For `/etc/passwd` that is `(name, uid, gid)`; for `/etc/group` the third
/// value is unused.
fn id_entries(content: &str) -> impl Iterator<Item = (&str, u32, u32)> {
    content.lines().filter_map(|line| {
        let mut fields = line.split(':');
        let name = fields.next()?;
        let id = fields.nth(1)?.parse().ok()?;
        let next = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
        Some((name, id, next))
    })
}

/// Reads a file under `rootfs` without following symlinks.
///
/// A missing file, or one reached through a symlink, reads as `None`: it
/// could point anywhere on the host.
fn read_rootfs_file(rootfs: &Path, relative: &str) -> std::result::Result<Option<String>, String> {
    let mut path = rootfs.to_path_buf();
    for part in relative.split('/') {
        path.push(part);
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                warn!("Not following symlink {}", path.display());
                return Ok(None);
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("{}: {}", path.display(), e)),
        }
    }
    std::fs::read_to_string(&path)
        .map(Some)
        .map_err(|e| format!("{}: {}", path.display(), e))
}

fn parse_numeric_user(user: &str) -> Option<(u32, u32)> {
    match user.split_once(':') {
        Some((uid, gid)) => Some((uid.parse().ok()?, gid.parse().ok()?)),
        None => {
            let uid = user.parse().ok()?;
            Some((uid, 0))
        }
    }
}

#[cfg(unix)]
fn collect_devices(dir: &Path, out: &mut Vec<OciDevice>) {
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if HOST_DEVICE_SKIP.iter().any(|skip| path == Path::new(skip)) {
            continue;
        }
        // symlink_metadata: /dev is full of symlinks we must not follow.
        let Ok(meta) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        let file_type = meta.file_type();
        if file_type.is_dir() {
            collect_devices(&path, out);
            continue;
        }
        let device_type = if file_type.is_char_device() {
            "c"
        } else if file_type.is_block_device() {
            "b"
        } else {
            continue;
        };
        let rdev = meta.rdev();
        out.push(OciDevice {
            path: path.to_string_lossy().to_string(),
            device_type: device_type.to_string(),
            major: libc::major(rdev as libc::dev_t) as i64,
            minor: libc::minor(rdev as libc::dev_t) as i64,
            file_mode: Some(meta.mode() & 0o777),
            uid: Some(meta.uid()),
            gid: Some(meta.gid()),
        });
    }
}

#[cfg(not(unix))]
fn collect_devices(_dir: &Path, _out: &mut Vec<OciDevice>) {}
