//! Well-known filesystem locations used by corral's built-in defaults.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Primary configuration file (override with `CORRAL_CONFIG`).
pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("CORRAL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/corral/corral.conf"))
});

/// Drop-in configuration directory (override with `CORRAL_CONFIG_DIR`).
pub static CONFIG_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("CORRAL_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/corral/corral.conf.d"))
});

/// Storage subsystem configuration file.
pub const STORAGE_CONF: &str = "/etc/containers/storage.conf";

/// Default storage graph root when the storage subsystem has no opinion.
pub const STORAGE_ROOT: &str = "/var/lib/containers/storage";

/// Default storage run root when the storage subsystem has no opinion.
pub const STORAGE_RUN_ROOT: &str = "/run/containers/storage";

/// Listen socket for the CRI server.
pub const SOCKET_PATH: &str = "/var/run/corral/corral.sock";

/// Directory for pod and container logs.
pub const LOG_DIR: &str = "/var/log/corral/pods";

/// Version file checked to detect reboots.
pub const VERSION_FILE: &str = "/var/run/corral/version";

/// File written on clean shutdown.
pub const CLEAN_SHUTDOWN_FILE: &str = "/var/lib/corral/clean.shutdown";

/// Directory where the monitor writes container exit files.
pub const CONTAINER_EXITS_DIR: &str = "/var/run/corral/exits";

/// Directory for container attach sockets.
pub const CONTAINER_ATTACH_SOCKET_DIR: &str = "/var/run/corral";

/// Image decryption keys.
pub const DECRYPTION_KEYS_PATH: &str = "/etc/corral/keys/";

/// Per-namespace signature policies.
pub const SIGNATURE_POLICY_DIR: &str = "/etc/corral/policies";

/// OCI hooks directory.
pub const HOOKS_DIR: &str = "/usr/share/containers/oci/hooks.d";

/// Container Device Interface spec directories.
pub const CDI_SPEC_DIRS: [&str; 2] = ["/etc/cdi", "/var/run/cdi"];

/// CNI network configuration directory.
pub const CNI_CONFIG_DIR: &str = "/etc/cni/net.d/";

/// CNI plugin binary directory.
pub const CNI_BIN_DIR: &str = "/opt/cni/bin/";

/// Managed namespace state directory.
pub const NAMESPACES_DIR: &str = "/var/run";

/// NRI socket.
pub const NRI_SOCKET: &str = "/var/run/nri/nri.sock";

/// NRI plugin directory.
pub const NRI_PLUGIN_DIR: &str = "/opt/nri/plugins";

/// NRI plugin configuration directory.
pub const NRI_PLUGIN_CONFIG_DIR: &str = "/etc/nri/conf.d";

/// irqbalance service configuration.
pub const IRQBALANCE_CONFIG_FILE: &str = "/etc/sysconfig/irqbalance";

/// Banned CPU mask to restore for irqbalance.
pub const IRQBALANCE_RESTORE_FILE: &str = "/etc/sysconfig/orig_irq_banned_cpus";

/// Time zone database.
pub const ZONEINFO_DIR: &str = "/usr/share/zoneinfo";

/// Cgroup filesystem mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_in_dir_sits_next_to_config() {
        if std::env::var_os("CORRAL_CONFIG").is_none()
            && std::env::var_os("CORRAL_CONFIG_DIR").is_none()
        {
            assert_eq!(CONFIG_PATH.parent(), CONFIG_DIR.parent());
        }
    }

    #[test]
    fn defaults_are_absolute() {
        for path in [SOCKET_PATH, LOG_DIR, SIGNATURE_POLICY_DIR, NAMESPACES_DIR] {
            assert!(std::path::Path::new(path).is_absolute(), "{path}");
        }
    }
}
