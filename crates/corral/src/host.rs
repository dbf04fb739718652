//! Host environment access.
//!
//! Everything the resolver needs from the machine it runs on goes through
//! [`HostEnv`]: executable lookup, kernel feature checks, the process-wide
//! SELinux switch and subprocess invocation. [`SystemHost`] talks to the
//! real system; tests substitute their own implementation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use corral_common::paths::{CGROUP_ROOT, ZONEINFO_DIR};
use corral_common::{ConfigError, ConfigResult};

/// `statfs` magic of a cgroup v2 mount.
#[cfg(target_os = "linux")]
const CGROUP2_SUPER_MAGIC: u64 = 0x6367_7270;

/// Access to the host the configuration is being resolved on.
#[async_trait]
pub trait HostEnv: Send + Sync + fmt::Debug {
    /// Search `$PATH` for an executable named `name`.
    fn look_path(&self, name: &str) -> Option<PathBuf>;

    /// Fail when the host lacks something the runtime cannot work without.
    fn check_node(&self) -> ConfigResult<()>;

    /// Whether systemd is the init system.
    fn systemd_running(&self) -> bool;

    /// Whether the unified cgroup v2 hierarchy is mounted.
    fn cgroup_v2(&self) -> bool;

    /// Whether SELinux labelling is active.
    fn selinux_enabled(&self) -> bool;

    /// Turn SELinux labelling off for the whole process.
    fn disable_selinux(&self);

    /// Whether the AppArmor LSM is active.
    fn apparmor_enabled(&self) -> bool;

    /// Whether `name` is a zone in the time zone database.
    fn timezone_exists(&self, name: &str) -> bool;

    /// Run `program` and return its combined stdout and stderr.
    ///
    /// A non-zero exit status is an error. The child is killed when
    /// `timeout` elapses.
    async fn run(&self, program: &Path, args: &[&str], timeout: Duration)
    -> ConfigResult<Vec<u8>>;
}

/// The real host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl SystemHost {
    /// Create a handle to the real host.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HostEnv for SystemHost {
    fn look_path(&self, name: &str) -> Option<PathBuf> {
        if name.contains('/') {
            let candidate = PathBuf::from(name);
            return is_executable(&candidate).then_some(candidate);
        }
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }

    #[cfg(target_os = "linux")]
    fn check_node(&self) -> ConfigResult<()> {
        if !Path::new("/proc/self/ns").exists() {
            return Err(ConfigError::Unsupported {
                feature: "procfs with namespace support".to_string(),
            });
        }
        if !Path::new(CGROUP_ROOT).is_dir() {
            return Err(ConfigError::Unsupported {
                feature: format!("cgroup hierarchy at {CGROUP_ROOT}"),
            });
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn check_node(&self) -> ConfigResult<()> {
        Err(ConfigError::Unsupported {
            feature: format!("container runtime on {}", std::env::consts::OS),
        })
    }

    fn systemd_running(&self) -> bool {
        Path::new("/run/systemd/system").is_dir()
    }

    #[cfg(target_os = "linux")]
    #[allow(clippy::cast_sign_loss, clippy::useless_conversion)]
    fn cgroup_v2(&self) -> bool {
        match rustix::fs::statfs(CGROUP_ROOT) {
            Ok(stat) => stat.f_type as u64 == CGROUP2_SUPER_MAGIC,
            Err(e) => {
                tracing::debug!(error = %e, "statfs on cgroup root failed");
                Path::new(CGROUP_ROOT).join("cgroup.controllers").exists()
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn cgroup_v2(&self) -> bool {
        false
    }

    fn selinux_enabled(&self) -> bool {
        crate::security::selinux::is_enabled()
    }

    fn disable_selinux(&self) {
        crate::security::selinux::set_disabled();
    }

    fn apparmor_enabled(&self) -> bool {
        crate::security::AppArmorConfig::host_enabled()
    }

    fn timezone_exists(&self, name: &str) -> bool {
        if name.is_empty() || name.starts_with('/') || name.split('/').any(|part| part == "..") {
            return false;
        }
        let root = std::env::var_os("ZONEINFO")
            .map_or_else(|| PathBuf::from(ZONEINFO_DIR), PathBuf::from);
        root.join(name).is_file()
    }

    async fn run(
        &self,
        program: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> ConfigResult<Vec<u8>> {
        let program_name = program.display().to_string();
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| ConfigError::CommandTimeout {
                program: program_name.clone(),
                seconds: timeout.as_secs(),
            })?
            .map_err(|e| ConfigError::Command {
                program: program_name.clone(),
                message: e.to_string(),
            })?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        if !output.status.success() {
            return Err(ConfigError::Command {
                program: program_name,
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&combined).trim()
                ),
            });
        }
        Ok(combined)
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Resolve an executable: search `$PATH` for `name` when `configured` is
/// empty, otherwise require `configured` to exist.
///
/// # Errors
///
/// Returns an error when the binary cannot be found.
pub fn resolve_executable(
    host: &dyn HostEnv,
    name: &str,
    configured: &Path,
) -> ConfigResult<PathBuf> {
    if configured.as_os_str().is_empty() {
        let found = host
            .look_path(name)
            .ok_or_else(|| ConfigError::ExecutableNotFound {
                name: name.to_string(),
            })?;
        tracing::debug!(executable = name, path = %found.display(), "Using executable from $PATH");
        return Ok(found);
    }
    if let Err(e) = std::fs::metadata(configured) {
        return Err(ConfigError::invalid(format!(
            "invalid {name} path {}: {e}",
            configured.display()
        )));
    }
    tracing::info!(executable = name, path = %configured.display(), "Using configured executable");
    Ok(configured.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn look_path_finds_sh() {
        let host = SystemHost::new();
        if Path::new("/bin/sh").exists() {
            assert!(host.look_path("/bin/sh").is_some());
        }
        assert!(host.look_path("definitely-not-a-real-binary-xyz").is_none());
    }

    #[test]
    fn timezone_rejects_traversal() {
        let host = SystemHost::new();
        assert!(!host.timezone_exists("../../etc/passwd"));
        assert!(!host.timezone_exists("/etc/passwd"));
        assert!(!host.timezone_exists(""));
    }

    #[test]
    fn resolve_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("runc");
        std::fs::write(&bin, "").unwrap();

        let host = SystemHost::new();
        assert_eq!(resolve_executable(&host, "runc", &bin).unwrap(), bin);
        assert!(resolve_executable(&host, "runc", &dir.path().join("missing")).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_collects_output_and_status() {
        let host = SystemHost::new();
        let sh = Path::new("/bin/sh");
        if !sh.exists() {
            return;
        }
        let out = host
            .run(sh, &["-c", "echo out; echo err >&2"], Duration::from_secs(5))
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("out") && text.contains("err"));

        let failed = host.run(sh, &["-c", "exit 3"], Duration::from_secs(5)).await;
        assert!(matches!(failed, Err(ConfigError::Command { .. })));

        let slow = host.run(sh, &["-c", "sleep 5"], Duration::from_millis(50)).await;
        assert!(matches!(slow, Err(ConfigError::CommandTimeout { .. })));
    }
}
