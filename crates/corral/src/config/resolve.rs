//! Turning a loaded [`Config`] into a [`ResolvedConfig`].

use std::collections::BTreeMap;
use std::sync::Arc;

use corral_common::{ConfigError, ConfigResult};

use super::{Config, RuntimeConfig, RuntimeHandler, Sysctl, is_empty_path};
use crate::cgroup::CgroupManager;
use crate::device::{Device, DeviceConfig};
use crate::host::HostEnv;
use crate::monitor::MonitorCapabilities;
use crate::namespace::{IdMapping, NamespaceManager};
use crate::network::CniManager;
use crate::security::{AppArmorConfig, BlockIoConfig, RdtConfig, SeccompConfig};
use crate::storage::StorageBackend;
use crate::ulimits::{Ulimit, UlimitsConfig};

/// How far validation goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Structural checks only. Nothing on the host is read or changed.
    Static,
    /// Full checks for a runtime about to serve: executables are resolved,
    /// directories created and subsystems initialised.
    Execution,
}

impl ValidationMode {
    /// Whether this is [`ValidationMode::Execution`].
    #[must_use]
    pub const fn is_execution(self) -> bool {
        matches!(self, Self::Execution)
    }
}

/// Everything built while resolving a configuration.
///
/// Managers are only present after execution-mode resolution.
#[derive(Debug, Clone)]
pub struct Subsystems {
    pub(crate) seccomp: SeccompConfig,
    pub(crate) apparmor: AppArmorConfig,
    pub(crate) blockio: BlockIoConfig,
    pub(crate) rdt: RdtConfig,
    pub(crate) ulimits: UlimitsConfig,
    pub(crate) devices: DeviceConfig,
    pub(crate) sysctls: Vec<Sysctl>,
    pub(crate) capabilities: caps::CapsHashSet,
    pub(crate) cgroup_manager: Option<Arc<dyn CgroupManager>>,
    pub(crate) namespace_manager: Option<NamespaceManager>,
    pub(crate) cni: Option<Arc<CniManager>>,
    pub(crate) monitors: BTreeMap<String, MonitorCapabilities>,
    pub(crate) command_prefix: Vec<String>,
    pub(crate) uid_mappings: Vec<IdMapping>,
    pub(crate) gid_mappings: Vec<IdMapping>,
}

impl Default for Subsystems {
    fn default() -> Self {
        Self {
            seccomp: SeccompConfig::new(),
            apparmor: AppArmorConfig::new(false),
            blockio: BlockIoConfig::new(),
            rdt: RdtConfig::new(),
            ulimits: UlimitsConfig::default(),
            devices: DeviceConfig::default(),
            sysctls: Vec::new(),
            capabilities: caps::CapsHashSet::new(),
            cgroup_manager: None,
            namespace_manager: None,
            cni: None,
            monitors: BTreeMap::new(),
            command_prefix: Vec::new(),
            uid_mappings: Vec::new(),
            gid_mappings: Vec::new(),
        }
    }
}

impl Subsystems {
    /// Load the seccomp, AppArmor, block I/O and RDT settings of `runtime`.
    ///
    /// A configured seccomp profile that does not exist falls back to the
    /// built-in one.
    pub(crate) fn load_security(&mut self, runtime: &RuntimeConfig, host: &dyn HostEnv) -> ConfigResult<()> {
        self.seccomp
            .set_use_default_when_empty(runtime.seccomp_use_default_when_empty);
        if let Err(e) = self.seccomp.load_profile(&runtime.seccomp_profile) {
            if !e.is_not_found() {
                return Err(ConfigError::invalid(format!("unable to load seccomp profile: {e}")));
            }
            tracing::info!(
                path = %runtime.seccomp_profile.display(),
                "Specified profile does not exist on disk"
            );
            self.seccomp.load_default_profile();
        }

        let mut apparmor = AppArmorConfig::new(host.apparmor_enabled());
        apparmor
            .load_profile(&runtime.apparmor_profile)
            .map_err(|e| ConfigError::invalid(format!("unable to load AppArmor profile: {e}")))?;
        self.apparmor = apparmor;

        let mut blockio = BlockIoConfig::new();
        if !is_empty_path(&runtime.blockio_config_file) {
            blockio
                .load(&runtime.blockio_config_file)
                .map_err(|e| ConfigError::invalid(format!("blockio configuration: {e}")))?;
        }
        blockio.set_reload_required(runtime.blockio_reload);
        self.blockio = blockio;

        let mut rdt = RdtConfig::new();
        if !is_empty_path(&runtime.rdt_config_file) {
            rdt.load(&runtime.rdt_config_file)
                .map_err(|e| ConfigError::invalid(format!("rdt configuration: {e}")))?;
        }
        self.rdt = rdt;
        Ok(())
    }

    /// Seccomp default profile and notifier location.
    #[must_use]
    pub const fn seccomp(&self) -> &SeccompConfig {
        &self.seccomp
    }

    /// AppArmor default profile.
    #[must_use]
    pub const fn apparmor(&self) -> &AppArmorConfig {
        &self.apparmor
    }

    /// Block I/O classes.
    #[must_use]
    pub const fn blockio(&self) -> &BlockIoConfig {
        &self.blockio
    }

    /// RDT classes.
    #[must_use]
    pub const fn rdt(&self) -> &RdtConfig {
        &self.rdt
    }

    /// Parsed `default_ulimits`.
    #[must_use]
    pub fn ulimits(&self) -> &[Ulimit] {
        self.ulimits.ulimits()
    }

    /// Parsed `additional_devices`.
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        self.devices.devices()
    }

    /// Parsed `default_sysctls`.
    #[must_use]
    pub fn sysctls(&self) -> &[Sysctl] {
        &self.sysctls
    }

    /// Parsed `default_capabilities`.
    #[must_use]
    pub const fn capabilities(&self) -> &caps::CapsHashSet {
        &self.capabilities
    }

    /// The selected cgroup manager.
    #[must_use]
    pub fn cgroup_manager(&self) -> Option<&Arc<dyn CgroupManager>> {
        self.cgroup_manager.as_ref()
    }

    /// The pinned namespace directories.
    #[must_use]
    pub const fn namespace_manager(&self) -> Option<&NamespaceManager> {
        self.namespace_manager.as_ref()
    }

    /// The network plugin manager.
    #[must_use]
    pub fn cni(&self) -> Option<&Arc<CniManager>> {
        self.cni.as_ref()
    }

    /// Monitor capabilities probed for the handler `name`.
    #[must_use]
    pub fn monitor(&self, name: &str) -> Option<&MonitorCapabilities> {
        self.monitors.get(name)
    }

    /// Prefix for processes pinned to `infra_ctr_cpuset`. Empty when unset.
    #[must_use]
    pub fn command_prefix(&self) -> &[String] {
        &self.command_prefix
    }

    /// Parsed `uid_mappings`.
    #[must_use]
    pub fn uid_mappings(&self) -> &[IdMapping] {
        &self.uid_mappings
    }

    /// Parsed `gid_mappings`.
    #[must_use]
    pub fn gid_mappings(&self) -> &[IdMapping] {
        &self.gid_mappings
    }
}

/// A validated configuration and the subsystems built from it.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    config: Config,
    subsystems: Subsystems,
    mode: ValidationMode,
}

impl ResolvedConfig {
    /// The validated configuration, including derived values.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Subsystems built during validation.
    #[must_use]
    pub const fn subsystems(&self) -> &Subsystems {
        &self.subsystems
    }

    /// The mode this configuration was resolved in.
    #[must_use]
    pub const fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// The handler `name`, if it survived validation.
    #[must_use]
    pub fn handler(&self, name: &str) -> Option<&RuntimeHandler> {
        self.config.runtime.runtimes.get(name)
    }

    /// The handler used when a pod names none.
    #[must_use]
    pub fn default_handler(&self) -> Option<&RuntimeHandler> {
        self.config.runtime.default_handler()
    }

    pub(crate) fn into_parts(self) -> (Config, Subsystems) {
        (self.config, self.subsystems)
    }

    pub(crate) const fn from_parts(config: Config, subsystems: Subsystems, mode: ValidationMode) -> Self {
        Self {
            config,
            subsystems,
            mode,
        }
    }
}

/// Validate `config` and build its subsystems.
///
/// Domains are checked in a fixed order: root, runtime, image, network,
/// API, NRI, then metrics and tracing. Errors from a domain name it.
///
/// # Errors
///
/// Returns the first failed check.
pub async fn resolve(
    mut config: Config,
    mode: ValidationMode,
    host: &dyn HostEnv,
    storage: &dyn StorageBackend,
) -> ConfigResult<ResolvedConfig> {
    let mut subsystems = Subsystems::default();

    if mode.is_execution() {
        host.check_node()?;
    }

    config
        .root
        .validate(mode, storage)
        .map_err(|e| e.in_domain("root"))?;
    config
        .runtime
        .validate(mode, host, &mut subsystems)
        .await
        .map_err(|e| e.in_domain("runtime"))?;
    subsystems
        .seccomp
        .set_notifier_path(config.api.seccomp_notifier_dir());
    config.image.validate(mode).map_err(|e| e.in_domain("image"))?;
    subsystems.cni = config
        .network
        .validate(mode)
        .map_err(|e| e.in_domain("network"))?
        .map(Arc::new);
    config.api.validate(mode).map_err(|e| e.in_domain("api"))?;

    if mode.is_execution() && !config.runtime.selinux {
        host.disable_selinux();
    }

    config.nri.validate(mode).map_err(|e| e.in_domain("nri"))?;
    config.metrics.validate().map_err(|e| e.in_domain("metrics"))?;
    config.tracing.validate().map_err(|e| e.in_domain("tracing"))?;

    tracing::debug!(
        ?mode,
        default_runtime = %config.runtime.default_runtime,
        handlers = config.runtime.runtimes.len(),
        "Configuration resolved"
    );
    Ok(ResolvedConfig {
        config,
        subsystems,
        mode,
    })
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::*;
    use crate::storage::StoreOptions;

    #[derive(Debug)]
    struct NoHost;

    #[async_trait::async_trait]
    impl HostEnv for NoHost {
        fn look_path(&self, _name: &str) -> Option<PathBuf> {
            None
        }
        fn check_node(&self) -> ConfigResult<()> {
            Err(ConfigError::Unsupported {
                feature: "node checks".to_string(),
            })
        }
        fn systemd_running(&self) -> bool {
            false
        }
        fn cgroup_v2(&self) -> bool {
            true
        }
        fn selinux_enabled(&self) -> bool {
            false
        }
        fn disable_selinux(&self) {
            panic!("static resolution must not touch SELinux");
        }
        fn apparmor_enabled(&self) -> bool {
            false
        }
        fn timezone_exists(&self, _name: &str) -> bool {
            false
        }
        async fn run(&self, program: &Path, _args: &[&str], _timeout: Duration) -> ConfigResult<Vec<u8>> {
            Err(ConfigError::Command {
                program: program.display().to_string(),
                message: "not available".to_string(),
            })
        }
    }

    #[derive(Debug)]
    struct NoStorage;

    impl StorageBackend for NoStorage {
        fn defaults(&self) -> ConfigResult<StoreOptions> {
            Ok(StoreOptions::default())
        }
        fn open(&self, _options: &StoreOptions) -> ConfigResult<StoreOptions> {
            panic!("static resolution must not open storage");
        }
    }

    #[tokio::test]
    async fn static_resolution_of_defaults() {
        let resolved = resolve(Config::default(), ValidationMode::Static, &NoHost, &NoStorage)
            .await
            .unwrap();
        assert_eq!(resolved.mode(), ValidationMode::Static);
        assert!(resolved.default_handler().is_some());
        assert!(resolved.subsystems().cgroup_manager().is_none());
        assert!(resolved.subsystems().cni().is_none());
        assert!(resolved.subsystems().monitor("runc").is_none());
        assert_eq!(
            resolved.subsystems().seccomp().notifier_path(),
            Some(Path::new("/var/run/corral/seccomp"))
        );
    }

    #[tokio::test]
    async fn execution_starts_with_node_check() {
        let err = resolve(Config::default(), ValidationMode::Execution, &NoHost, &NoStorage)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn failures_name_their_domain() {
        let mut config = Config::default();
        config.image.pause_image = "docker://registry.k8s.io/pause".to_string();
        let err = resolve(config, ValidationMode::Static, &NoHost, &NoStorage)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("validating image config: invalid pause image"));

        let mut config = Config::default();
        config.runtime.default_runtime = "ghost".to_string();
        let err = resolve(config, ValidationMode::Static, &NoHost, &NoStorage)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Domain { domain: "runtime", ref source }
                if matches!(**source, ConfigError::DefaultRuntimeMissing { .. })
        ));
    }
}
