//! Cgroup manager implementations.

use std::fmt;
use std::sync::Arc;

use corral_common::{ConfigError, ConfigResult};

use crate::host::HostEnv;

/// Name of the systemd-driven manager.
pub const SYSTEMD: &str = "systemd";

/// Name of the manager writing the cgroup filesystem directly.
pub const CGROUPFS: &str = "cgroupfs";

/// Monitor cgroup value that places the monitor in the pod's cgroup.
pub const POD_CGROUP: &str = "pod";

/// Unit suffix accepted for monitor cgroups under systemd.
pub const SLICE_SUFFIX: &str = ".slice";

/// Creates and names cgroups for pods and containers.
pub trait CgroupManager: Send + Sync + fmt::Debug {
    /// The configuration name (`systemd` or `cgroupfs`).
    fn name(&self) -> &'static str;

    /// Whether cgroups are managed through systemd.
    fn is_systemd(&self) -> bool;

    /// Whether the host runs the unified hierarchy.
    fn is_cgroup_v2(&self) -> bool;

    /// Check the cgroup a monitor process is placed into.
    ///
    /// # Errors
    ///
    /// Returns an error when the value is not allowed for this manager.
    fn validate_monitor_cgroup(&self, cgroup: &str) -> ConfigResult<()>;
}

/// Manager that delegates cgroup creation to systemd.
#[derive(Debug, Clone)]
pub struct SystemdManager {
    v2: bool,
}

impl CgroupManager for SystemdManager {
    fn name(&self) -> &'static str {
        SYSTEMD
    }

    fn is_systemd(&self) -> bool {
        true
    }

    fn is_cgroup_v2(&self) -> bool {
        self.v2
    }

    fn validate_monitor_cgroup(&self, cgroup: &str) -> ConfigResult<()> {
        if cgroup == POD_CGROUP || cgroup.ends_with(SLICE_SUFFIX) {
            return Ok(());
        }
        Err(ConfigError::invalid(format!(
            "monitor cgroup {cgroup:?} must be {POD_CGROUP:?} or end with {SLICE_SUFFIX:?} when using the systemd cgroup manager"
        )))
    }
}

/// Manager that writes the cgroup filesystem directly.
#[derive(Debug, Clone)]
pub struct CgroupfsManager {
    v2: bool,
}

impl CgroupManager for CgroupfsManager {
    fn name(&self) -> &'static str {
        CGROUPFS
    }

    fn is_systemd(&self) -> bool {
        false
    }

    fn is_cgroup_v2(&self) -> bool {
        self.v2
    }

    fn validate_monitor_cgroup(&self, cgroup: &str) -> ConfigResult<()> {
        if cgroup.is_empty() || cgroup == POD_CGROUP {
            return Ok(());
        }
        Err(ConfigError::invalid(format!(
            "monitor cgroup {cgroup:?} must be {POD_CGROUP:?} or empty when using the cgroupfs cgroup manager"
        )))
    }
}

/// Pick the manager for `name`. An empty name picks systemd when systemd is
/// running and cgroupfs otherwise.
///
/// # Errors
///
/// Fails for unknown names, and for `systemd` on a host without systemd.
pub fn select(name: &str, host: &dyn HostEnv) -> ConfigResult<Arc<dyn CgroupManager>> {
    let v2 = host.cgroup_v2();
    let manager: Arc<dyn CgroupManager> = match name {
        "" if host.systemd_running() => Arc::new(SystemdManager { v2 }),
        "" | CGROUPFS => Arc::new(CgroupfsManager { v2 }),
        SYSTEMD => {
            if !host.systemd_running() {
                return Err(ConfigError::invalid(
                    "systemd cgroup manager requested but systemd is not running",
                ));
            }
            Arc::new(SystemdManager { v2 })
        }
        other => {
            return Err(ConfigError::invalid(format!(
                "invalid cgroup manager {other:?}, expected {SYSTEMD:?} or {CGROUPFS:?}"
            )));
        }
    };
    tracing::info!(manager = manager.name(), cgroup_v2 = v2, "Selected cgroup manager");
    Ok(manager)
}

/// Check a configured manager name without touching the host.
///
/// # Errors
///
/// Fails for names other than `systemd`, `cgroupfs` or empty.
pub fn validate_name(name: &str) -> ConfigResult<()> {
    match name {
        "" | SYSTEMD | CGROUPFS => Ok(()),
        other => Err(ConfigError::invalid(format!(
            "invalid cgroup manager {other:?}, expected {SYSTEMD:?} or {CGROUPFS:?}"
        ))),
    }
}
