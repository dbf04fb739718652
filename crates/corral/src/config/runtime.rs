//! `[corral.runtime]`: container execution settings.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use corral_common::paths::{
    CDI_SPEC_DIRS, CONTAINER_ATTACH_SOCKET_DIR, CONTAINER_EXITS_DIR, DECRYPTION_KEYS_PATH,
    HOOKS_DIR, IRQBALANCE_CONFIG_FILE, IRQBALANCE_RESTORE_FILE, NAMESPACES_DIR,
};
use corral_common::{ConfigError, ConfigResult};
use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::handler::{DEFAULT_MONITOR_CGROUP, DEFAULT_RUNTIME, RuntimeHandler, probe_features};
use super::workloads::{Workloads, validate_workloads};
use super::{Subsystems, ValidationMode, is_empty_path};
use crate::cgroup;
use crate::cpuset::CpuSet;
use crate::device::DeviceConfig;
use crate::host::{HostEnv, resolve_executable};
use crate::monitor::{MONITOR_BINARY, MonitorCapabilities};
use crate::namespace::{NamespaceManager, parse_id_mappings};
use crate::security::{Capabilities, apparmor};
use crate::ulimits::UlimitsConfig;

/// Smallest positive `log_size_max`: the monitor's read buffer.
pub const OCI_BUF_SIZE: i64 = 8192;

/// Lower bound for `ctr_stop_timeout`, in seconds.
pub const DEFAULT_CTR_STOP_TIMEOUT: i64 = 30;

/// How long a runtime or monitor may take to answer a probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const CPU_PINNING_BINARY: &str = "taskset";
const PINNS_BINARY: &str = "pinns";
const CRIU_BINARY: &str = "criu";
const LOG_LEVELS: [&str; 8] = ["trace", "debug", "info", "warn", "warning", "error", "fatal", "panic"];

const fn default_probe_timeout() -> Duration {
    DEFAULT_PROBE_TIMEOUT
}

/// A `key=value` entry of `default_sysctls`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sysctl {
    key: String,
    value: String,
}

impl Sysctl {
    /// The sysctl name.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value to set.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl FromStr for Sysctl {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::invalid(format!("{s:?} is not in key=value format")))?;
        let (key, value) = (key.trim(), value.trim());
        if key.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid(format!("{key:?} contains whitespace")));
        }
        if key.is_empty() {
            return Err(ConfigError::invalid(format!("key is empty in {s:?}")));
        }
        if value.is_empty() {
            return Err(ConfigError::invalid(format!("value is empty in {s:?}")));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

impl fmt::Display for Sysctl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Container execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Apply the default seccomp profile when a pod asks for none.
    pub seccomp_use_default_when_empty: bool,
    /// Do not use `pivot_root` when creating containers.
    pub no_pivot: bool,
    /// Enable SELinux labelling.
    pub selinux: bool,
    /// Send container logs to journald as well.
    pub log_to_journald: bool,
    /// Do not create infra containers for pods that do not need them.
    pub drop_infra_ctr: bool,
    /// Mount container root filesystems read-only.
    pub read_only: bool,
    /// Monitor environment for every OCI handler. Deprecated.
    pub conmon_env: Vec<String>,
    /// OCI hooks directories.
    pub hooks_dir: Vec<PathBuf>,
    /// Capabilities granted to containers.
    pub default_capabilities: Capabilities,
    /// Add the default capabilities to the inheritable set as well.
    pub add_inheritable_capabilities: bool,
    /// Environment added to every container.
    pub default_env: Vec<String>,
    /// Sysctls set in every container.
    pub default_sysctls: Vec<String>,
    /// Ulimits set in every container.
    pub default_ulimits: Vec<String>,
    /// Devices pods may request through annotations.
    pub allowed_devices: Vec<String>,
    /// Devices added to every container.
    pub additional_devices: Vec<String>,
    /// Container Device Interface spec directories.
    pub cdi_spec_dirs: Vec<PathBuf>,
    /// Give devices the owner of the container's security context.
    pub device_ownership_from_security_context: bool,
    /// Handler used when a pod names none.
    pub default_runtime: String,
    /// Image decryption keys.
    pub decryption_keys_path: PathBuf,
    /// Monitor executable for every OCI handler. Deprecated.
    pub conmon: PathBuf,
    /// Monitor cgroup for every OCI handler. Deprecated.
    pub conmon_cgroup: String,
    /// Seccomp profile file. Empty means the built-in profile.
    pub seccomp_profile: PathBuf,
    /// Default AppArmor profile.
    pub apparmor_profile: String,
    /// Block I/O class configuration.
    pub blockio_config_file: PathBuf,
    /// Re-read the block I/O configuration on reload.
    pub blockio_reload: bool,
    /// irqbalance service configuration.
    pub irqbalance_config_file: PathBuf,
    /// Banned CPU mask restored on startup.
    pub irqbalance_config_restore_file: PathBuf,
    /// RDT class configuration.
    pub rdt_config_file: PathBuf,
    /// `systemd` or `cgroupfs`. Empty picks one for the host.
    pub cgroup_manager: String,
    /// Mounts added to every container.
    pub default_mounts_file: PathBuf,
    /// Where the monitor writes exit files.
    pub container_exits_dir: PathBuf,
    /// Where attach sockets are created.
    pub container_attach_socket_dir: PathBuf,
    /// Prefix for bind mount sources.
    pub bind_mount_prefix: String,
    /// User namespace UID mappings (`container:host:size,...`).
    pub uid_mappings: String,
    /// User namespace GID mappings.
    pub gid_mappings: String,
    /// Lowest host UID a mapping may use. `-1` disables the check.
    pub minimum_mappable_uid: i64,
    /// Lowest host GID a mapping may use. `-1` disables the check.
    pub minimum_mappable_gid: i64,
    /// Log level.
    pub log_level: String,
    /// Regex filtering log messages.
    pub log_filter: String,
    /// Where pinned namespaces live.
    pub namespaces_dir: PathBuf,
    /// Namespace pinning helper.
    pub pinns_path: PathBuf,
    /// Allow checkpoint and restore.
    pub enable_criu_support: bool,
    /// Pids limit per container. `-1` is unlimited.
    pub pids_limit: i64,
    /// Largest container log in bytes. Negative is unlimited.
    pub log_size_max: i64,
    /// Seconds a container gets to stop before it is killed.
    pub ctr_stop_timeout: i64,
    /// Cgroup image pulls run in.
    pub separate_pull_cgroup: String,
    /// CPUs infra containers are pinned to.
    pub infra_ctr_cpuset: String,
    /// CPUs shared between guaranteed containers.
    pub shared_cpuset: String,
    /// Mount sources that must exist instead of being created.
    pub absent_mount_sources_to_reject: Vec<PathBuf>,
    /// Emit pod lifecycle events.
    pub enable_pod_events: bool,
    /// Disable SELinux for host network pods.
    pub hostnetwork_disable_selinux: bool,
    /// Do not map host ports.
    pub disable_hostport_mapping: bool,
    /// Time zone of containers. `local` uses the host's.
    pub timezone: String,
    /// Runtime handlers by name.
    pub runtimes: BTreeMap<String, RuntimeHandler>,
    /// Workload profiles by name.
    pub workloads: Workloads,

    /// Budget for each runtime and monitor probe.
    #[serde(skip, default = "default_probe_timeout")]
    pub features_probe_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            seccomp_use_default_when_empty: true,
            no_pivot: false,
            selinux: false,
            log_to_journald: false,
            drop_infra_ctr: true,
            read_only: false,
            conmon_env: Vec::new(),
            hooks_dir: vec![PathBuf::from(HOOKS_DIR)],
            default_capabilities: Capabilities::default(),
            add_inheritable_capabilities: false,
            default_env: Vec::new(),
            default_sysctls: Vec::new(),
            default_ulimits: Vec::new(),
            allowed_devices: vec!["/dev/fuse".to_string()],
            additional_devices: Vec::new(),
            cdi_spec_dirs: CDI_SPEC_DIRS.iter().map(PathBuf::from).collect(),
            device_ownership_from_security_context: false,
            default_runtime: DEFAULT_RUNTIME.to_string(),
            decryption_keys_path: PathBuf::from(DECRYPTION_KEYS_PATH),
            conmon: PathBuf::new(),
            conmon_cgroup: String::new(),
            seccomp_profile: PathBuf::new(),
            apparmor_profile: apparmor::DEFAULT_PROFILE.to_string(),
            blockio_config_file: PathBuf::new(),
            blockio_reload: false,
            irqbalance_config_file: PathBuf::from(IRQBALANCE_CONFIG_FILE),
            irqbalance_config_restore_file: PathBuf::from(IRQBALANCE_RESTORE_FILE),
            rdt_config_file: PathBuf::new(),
            cgroup_manager: String::new(),
            default_mounts_file: PathBuf::new(),
            container_exits_dir: PathBuf::from(CONTAINER_EXITS_DIR),
            container_attach_socket_dir: PathBuf::from(CONTAINER_ATTACH_SOCKET_DIR),
            bind_mount_prefix: String::new(),
            uid_mappings: String::new(),
            gid_mappings: String::new(),
            minimum_mappable_uid: -1,
            minimum_mappable_gid: -1,
            log_level: "info".to_string(),
            log_filter: String::new(),
            namespaces_dir: PathBuf::from(NAMESPACES_DIR),
            pinns_path: PathBuf::new(),
            enable_criu_support: false,
            pids_limit: -1,
            log_size_max: -1,
            ctr_stop_timeout: DEFAULT_CTR_STOP_TIMEOUT,
            separate_pull_cgroup: String::new(),
            infra_ctr_cpuset: String::new(),
            shared_cpuset: String::new(),
            absent_mount_sources_to_reject: Vec::new(),
            enable_pod_events: false,
            hostnetwork_disable_selinux: true,
            disable_hostport_mapping: false,
            timezone: String::new(),
            runtimes: BTreeMap::from([(DEFAULT_RUNTIME.to_string(), RuntimeHandler::builtin())]),
            workloads: Workloads::new(),
            features_probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    /// Validate the runtime table and build its subsystems.
    ///
    /// Both modes parse every list-valued setting and check handlers
    /// structurally. Execution mode also selects the cgroup manager,
    /// resolves executables, probes runtimes and the monitor, prepares
    /// hook and namespace directories, and loads the security profiles.
    ///
    /// A failing non-default handler is dropped with a warning; a failing
    /// default handler fails validation.
    ///
    /// # Errors
    ///
    /// Returns the first failed check.
    pub async fn validate(
        &mut self,
        mode: ValidationMode,
        host: &dyn HostEnv,
        subsystems: &mut Subsystems,
    ) -> ConfigResult<()> {
        subsystems.ulimits = UlimitsConfig::load(&self.default_ulimits)?;
        subsystems.devices = DeviceConfig::load(&self.additional_devices)?;

        self.validate_default_runtime()?;
        self.validate_timezone(host)?;

        if self.log_size_max >= 0 && self.log_size_max < OCI_BUF_SIZE {
            return Err(ConfigError::invalid(format!(
                "log size max should be negative or >= {OCI_BUF_SIZE}"
            )));
        }

        if self.ctr_stop_timeout < DEFAULT_CTR_STOP_TIMEOUT {
            self.ctr_stop_timeout = DEFAULT_CTR_STOP_TIMEOUT;
            tracing::warn!(
                ctr_stop_timeout = self.ctr_stop_timeout,
                "Forcing ctr_stop_timeout to lowest possible value"
            );
        }

        subsystems.sysctls = self
            .sysctls()
            .map_err(|e| ConfigError::invalid(format!("invalid default_sysctls: {e}")))?;
        subsystems.capabilities = self
            .default_capabilities
            .to_caps()
            .map_err(|e| ConfigError::invalid(format!("invalid capabilities: {e}")))?;

        self.validate_logging()?;
        let infra_cpuset = parse_cpuset("infra_ctr_cpuset", &self.infra_ctr_cpuset)?;
        parse_cpuset("shared_cpuset", &self.shared_cpuset)?;
        self.validate_id_mappings(subsystems)?;
        cgroup::validate_name(&self.cgroup_manager)?;
        validate_workloads(&self.workloads)
            .map_err(|e| ConfigError::invalid(format!("workloads validation: {e}")))?;

        self.retain_valid_handlers(mode, host)?;

        if mode.is_execution() {
            if let Some(cpuset) = infra_cpuset {
                let taskset = host.look_path(CPU_PINNING_BINARY).ok_or_else(|| {
                    ConfigError::ExecutableNotFound {
                        name: CPU_PINNING_BINARY.to_string(),
                    }
                })?;
                subsystems.command_prefix = vec![
                    taskset.display().to_string(),
                    "--cpu-list".to_string(),
                    cpuset.to_string(),
                ];
            }

            let manager = cgroup::select(&self.cgroup_manager, host)
                .map_err(|e| ConfigError::invalid(format!("unable to update cgroup manager: {e}")))?;
            if !self.separate_pull_cgroup.is_empty() && !manager.is_systemd() {
                return Err(ConfigError::invalid(
                    "separate_pull_cgroup is only supported with the systemd cgroup manager",
                ));
            }
            subsystems.cgroup_manager = Some(manager);

            self.probe_handler_features(host).await;
            self.filter_hooks_dirs();

            self.pinns_path = resolve_executable(host, PINNS_BINARY, &self.pinns_path)
                .map_err(|e| ConfigError::invalid(format!("pinns validation: {e}")))?;
            let namespaces = NamespaceManager::new(&self.namespaces_dir, &self.pinns_path);
            namespaces
                .initialize()
                .map_err(|e| ConfigError::invalid(format!("initialize namespace manager: {e}")))?;
            subsystems.namespace_manager = Some(namespaces);

            if self.enable_criu_support {
                if host.look_path(CRIU_BINARY).is_none() {
                    return Err(ConfigError::invalid(
                        "cannot enable checkpoint/restore support without the criu binary in $PATH",
                    ));
                }
                tracing::info!("Checkpoint/restore support enabled");
            } else {
                tracing::info!("Checkpoint/restore support disabled");
            }

            subsystems.load_security(self, host)?;
        }

        self.translate_monitor_fields(mode, host, subsystems).await
    }

    /// Make sure the default runtime names a handler. An unset default
    /// falls back to the built-in `runc` handler.
    ///
    /// # Errors
    ///
    /// Fails when the default runtime is set but has no handler entry.
    pub fn validate_default_runtime(&mut self) -> ConfigResult<()> {
        if self.runtimes.contains_key(&self.default_runtime) {
            return Ok(());
        }
        if !self.default_runtime.is_empty() {
            return Err(ConfigError::DefaultRuntimeMissing {
                name: self.default_runtime.clone(),
            });
        }

        tracing::debug!(runtime = DEFAULT_RUNTIME, "Defaulting runtime since default_runtime is not set");
        self.runtimes
            .entry(DEFAULT_RUNTIME.to_string())
            .or_insert_with(RuntimeHandler::builtin);
        self.default_runtime = DEFAULT_RUNTIME.to_string();
        Ok(())
    }

    /// The handler selected by `default_runtime`.
    #[must_use]
    pub fn default_handler(&self) -> Option<&RuntimeHandler> {
        self.runtimes.get(&self.default_runtime)
    }

    /// Parsed `default_sysctls`.
    ///
    /// # Errors
    ///
    /// Returns the first malformed entry.
    pub fn sysctls(&self) -> ConfigResult<Vec<Sysctl>> {
        self.default_sysctls.iter().map(|s| s.parse()).collect()
    }

    fn validate_timezone(&self, host: &dyn HostEnv) -> ConfigResult<()> {
        if self.timezone.is_empty() || self.timezone.eq_ignore_ascii_case("local") {
            return Ok(());
        }
        if !host.timezone_exists(&self.timezone) {
            return Err(ConfigError::invalid(format!("invalid timezone: {}", self.timezone)));
        }
        Ok(())
    }

    fn validate_logging(&self) -> ConfigResult<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::invalid(format!("invalid log_level {:?}", self.log_level)));
        }
        if !self.log_filter.is_empty() {
            Regex::new(&self.log_filter)
                .map_err(|e| ConfigError::invalid(format!("invalid log_filter: {e}")))?;
        }
        Ok(())
    }

    fn validate_id_mappings(&self, subsystems: &mut Subsystems) -> ConfigResult<()> {
        let uid = parse_id_mappings(&self.uid_mappings)
            .map_err(|e| ConfigError::invalid(format!("invalid uid_mappings: {e}")))?;
        let gid = parse_id_mappings(&self.gid_mappings)
            .map_err(|e| ConfigError::invalid(format!("invalid gid_mappings: {e}")))?;

        if let Some(mapping) = uid.iter().find(|m| !m.host_range_above(self.minimum_mappable_uid)) {
            return Err(ConfigError::invalid(format!(
                "uid mapping {mapping} is below minimum_mappable_uid {}",
                self.minimum_mappable_uid
            )));
        }
        if let Some(mapping) = gid.iter().find(|m| !m.host_range_above(self.minimum_mappable_gid)) {
            return Err(ConfigError::invalid(format!(
                "gid mapping {mapping} is below minimum_mappable_gid {}",
                self.minimum_mappable_gid
            )));
        }

        subsystems.uid_mappings = uid;
        subsystems.gid_mappings = gid;
        Ok(())
    }

    /// Validate every handler in name order and drop the failing ones.
    fn retain_valid_handlers(&mut self, mode: ValidationMode, host: &dyn HostEnv) -> ConfigResult<()> {
        let mut failed = Vec::new();
        for (name, handler) in &mut self.runtimes {
            if let Err(e) = handler.validate(name, mode, host) {
                if *name == self.default_runtime {
                    return Err(e);
                }
                tracing::warn!(runtime = %name, error = %e, "Runtime handler failed validation, removing it");
                failed.push(name.clone());
            }
        }
        for name in failed {
            self.runtimes.remove(&name);
        }
        Ok(())
    }

    /// Ask every OCI handler for its features, concurrently. Failures leave
    /// the handler without features.
    async fn probe_handler_features(&mut self, host: &dyn HostEnv) {
        let timeout = self.features_probe_timeout;
        let targets: Vec<(String, PathBuf)> = self
            .runtimes
            .iter_mut()
            .filter(|(_, handler)| handler.is_oci())
            .map(|(name, handler)| {
                handler.set_features(None);
                (name.clone(), handler.runtime_path.clone())
            })
            .collect();

        let results = join_all(targets.iter().map(|(name, path)| async move {
            (name, probe_features(host, path, timeout).await)
        }))
        .await;

        for (name, result) in results {
            match result {
                Ok(features) => {
                    tracing::debug!(runtime = %name, "Retrieved runtime features");
                    if let Some(handler) = self.runtimes.get_mut(name) {
                        handler.set_features(Some(features));
                    }
                }
                Err(e) => {
                    tracing::error!(runtime = %name, error = %e, "Unable to retrieve runtime features");
                }
            }
        }
    }

    /// Keep hook directories that exist or can be created.
    fn filter_hooks_dirs(&mut self) {
        let dirs = std::mem::take(&mut self.hooks_dir);
        self.hooks_dir = dirs
            .into_iter()
            .filter(|dir| match std::fs::metadata(dir) {
                Ok(meta) if meta.is_dir() => true,
                Ok(_) => {
                    tracing::warn!(path = %dir.display(), "Skipping invalid hooks directory: exists but is not a directory");
                    false
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    match std::fs::create_dir_all(dir) {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::debug!(path = %dir.display(), error = %e, "Failed to create requested hooks dir");
                            false
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "Skipping unreadable hooks directory");
                    false
                }
            })
            .inspect(|dir| tracing::debug!(path = %dir.display(), "Using hooks directory"))
            .collect();
    }

    /// Move the deprecated global monitor settings into each OCI handler.
    /// In execution mode also resolve and probe the monitor and check its
    /// cgroup against the selected cgroup manager.
    async fn translate_monitor_fields(
        &mut self,
        mode: ValidationMode,
        host: &dyn HostEnv,
        subsystems: &mut Subsystems,
    ) -> ConfigResult<()> {
        let timeout = self.features_probe_timeout;
        for (name, handler) in self.runtimes.iter_mut().filter(|(_, h)| h.is_oci()) {
            let failed = |e: ConfigError| {
                ConfigError::handler(name.as_str(), format!("failed to translate monitor fields: {e}"))
            };

            if !self.conmon_cgroup.is_empty() {
                tracing::debug!(runtime = %name, from = %handler.monitor_cgroup, to = %self.conmon_cgroup, "Replacing monitor cgroup");
                handler.monitor_cgroup.clone_from(&self.conmon_cgroup);
            }
            if !is_empty_path(&self.conmon) {
                tracing::debug!(runtime = %name, from = %handler.monitor_path.display(), to = %self.conmon.display(), "Replacing monitor path");
                handler.monitor_path.clone_from(&self.conmon);
            }
            if !self.conmon_env.is_empty() {
                tracing::debug!(runtime = %name, "Replacing monitor environment");
                handler.monitor_env.clone_from(&self.conmon_env);
            }
            if handler.monitor_cgroup.is_empty() {
                handler.monitor_cgroup = DEFAULT_MONITOR_CGROUP.to_string();
            }

            if !mode.is_execution() {
                continue;
            }

            handler.monitor_path =
                resolve_executable(host, MONITOR_BINARY, &handler.monitor_path).map_err(failed)?;
            let capabilities = MonitorCapabilities::probe(host, &handler.monitor_path, timeout)
                .await
                .map_err(failed)?;
            subsystems.monitors.insert(name.clone(), capabilities);

            if let Some(manager) = &subsystems.cgroup_manager {
                manager
                    .validate_monitor_cgroup(&handler.monitor_cgroup)
                    .map_err(failed)?;
            }
        }
        Ok(())
    }
}

fn parse_cpuset(field: &str, value: &str) -> ConfigResult<Option<CpuSet>> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|e| ConfigError::invalid(format!("invalid {field}: {e}")))
}
