//! Runtime configuration.
//!
//! A [`Config`] starts from built-in defaults, is folded with the primary
//! file and every drop-in fragment (see [`Config::update_from_file`] and
//! [`Config::update_from_path`]), and is then turned into a
//! [`ResolvedConfig`] by [`resolve`]. Only the resolved form is handed to
//! the rest of the runtime.
//!
//! # Example
//!
//! ```toml
//! [corral]
//! log_dir = "/var/log/corral/pods"
//!
//! [corral.runtime]
//! default_runtime = "crun"
//!
//! [corral.runtime.runtimes.crun]
//! runtime_path = "/usr/bin/crun"
//! monitor_cgroup = "pod"
//! ```

mod api;
mod handler;
mod image;
mod load;
mod network;
mod nri;
mod reload;
mod resolve;
mod root;
mod runtime;
mod telemetry;
mod workloads;

use std::path::{Path, PathBuf};

use corral_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

pub use api::{ApiConfig, DEFAULT_GRPC_MAX_MSG_SIZE, remove_unused_socket};
pub use handler::{
    DEFAULT_MONITOR_CGROUP, DEFAULT_MONITOR_ENV, DEFAULT_RUNTIME, DEFAULT_RUNTIME_ROOT,
    MONITOR_EXEC_CGROUP_CONTAINER, MONITOR_EXEC_CGROUP_DEFAULT, RuntimeHandler, RuntimeType,
    VM_BINARY_PATTERN, probe_features,
};
pub use image::{DEFAULT_PAUSE_IMAGE, ImageConfig, ImageVolumes};
pub use load::remove_dup_storage_opts;
pub use network::NetworkConfig;
pub use nri::NriConfig;
pub use reload::ConfigHandle;
pub use resolve::{ResolvedConfig, Subsystems, ValidationMode, resolve};
pub use root::RootConfig;
pub use runtime::{
    DEFAULT_CTR_STOP_TIMEOUT, DEFAULT_PROBE_TIMEOUT, OCI_BUF_SIZE, RuntimeConfig, Sysctl,
};
pub use telemetry::{METRICS_COLLECTORS, MetricsConfig, StatsConfig, TracingConfig};
pub use workloads::{WorkloadConfig, WorkloadResources, Workloads};

use crate::host::HostEnv;
use crate::storage::StorageBackend;

/// Whether a configured path was left unset.
#[must_use]
pub fn is_empty_path(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

/// The complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// `[corral]`
    pub root: RootConfig,
    /// `[corral.api]`
    pub api: ApiConfig,
    /// `[corral.runtime]`
    pub runtime: RuntimeConfig,
    /// `[corral.image]`
    pub image: ImageConfig,
    /// `[corral.network]`
    pub network: NetworkConfig,
    /// `[corral.metrics]`
    pub metrics: MetricsConfig,
    /// `[corral.tracing]`
    pub tracing: TracingConfig,
    /// `[corral.stats]`
    pub stats: StatsConfig,
    /// `[corral.nri]`
    pub nri: NriConfig,

    single_config_path: Option<PathBuf>,
    drop_in_config_dir: Option<PathBuf>,
}

/// On-disk shape: everything lives under the `[corral]` table.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct ConfigFile {
    #[serde(default)]
    pub(crate) corral: CorralTable,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct CorralTable {
    #[serde(flatten)]
    pub(crate) root: RootConfig,
    #[serde(default)]
    pub(crate) api: ApiConfig,
    #[serde(default)]
    pub(crate) runtime: RuntimeConfig,
    #[serde(default)]
    pub(crate) image: ImageConfig,
    #[serde(default)]
    pub(crate) network: NetworkConfig,
    #[serde(default)]
    pub(crate) metrics: MetricsConfig,
    #[serde(default)]
    pub(crate) tracing: TracingConfig,
    #[serde(default)]
    pub(crate) stats: StatsConfig,
    #[serde(default)]
    pub(crate) nri: NriConfig,
}

impl Config {
    /// Built-in defaults with the storage fields taken from the storage
    /// subsystem and the cgroup manager picked for this host.
    ///
    /// # Errors
    ///
    /// Fails when the storage subsystem's own configuration is unreadable.
    pub fn new_default(storage: &dyn StorageBackend, host: &dyn HostEnv) -> ConfigResult<Self> {
        let mut config = Self::default();
        config.root.apply_store_defaults(storage.defaults()?);
        config.runtime.cgroup_manager = if host.systemd_running() {
            crate::cgroup::SYSTEMD.to_string()
        } else {
            crate::cgroup::CGROUPFS.to_string()
        };
        config.runtime.selinux = host.selinux_enabled();
        Ok(config)
    }

    /// Load from `config_path` and the drop-in directory `config_dir` on top
    /// of [`Config::new_default`]. A missing primary file is skipped.
    ///
    /// # Errors
    ///
    /// Fails for unreadable or malformed fragments.
    pub fn load(
        config_path: &Path,
        config_dir: &Path,
        storage: &dyn StorageBackend,
        host: &dyn HostEnv,
    ) -> ConfigResult<Self> {
        let mut config = Self::new_default(storage, host)?;
        if config_path.exists() {
            config.update_from_file(config_path)?;
        } else {
            tracing::debug!(path = %config_path.display(), "Skipping missing configuration file");
        }
        config.update_from_path(config_dir)?;
        Ok(config)
    }

    /// Decode a single TOML document on top of the built-in defaults.
    ///
    /// # Errors
    ///
    /// Fails when the document is not valid TOML or has wrongly typed keys.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let mut config = Self::default();
        config.merge_str(Path::new("<inline>"), content)?;
        Ok(config)
    }

    /// Primary file this configuration was loaded from.
    #[must_use]
    pub fn single_config_path(&self) -> Option<&Path> {
        self.single_config_path.as_deref()
    }

    /// Drop-in directory this configuration was loaded from.
    #[must_use]
    pub fn drop_in_config_dir(&self) -> Option<&Path> {
        self.drop_in_config_dir.as_deref()
    }

    /// Encode as a TOML document.
    ///
    /// # Errors
    ///
    /// Fails only if a value has no TOML representation.
    pub fn to_toml_pretty(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(&self.to_file_repr())?)
    }

    /// [`Config::to_toml_pretty`] as bytes.
    ///
    /// # Errors
    ///
    /// See [`Config::to_toml_pretty`].
    pub fn to_bytes(&self) -> ConfigResult<Vec<u8>> {
        self.to_toml_pretty().map(String::into_bytes)
    }

    /// Write the encoded configuration to `path`.
    ///
    /// # Errors
    ///
    /// Fails when encoding or writing fails.
    pub fn to_file(&self, path: &Path) -> ConfigResult<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub(crate) fn to_file_repr(&self) -> ConfigFile {
        ConfigFile {
            corral: CorralTable {
                root: self.root.clone(),
                api: self.api.clone(),
                runtime: self.runtime.clone(),
                image: self.image.clone(),
                network: self.network.clone(),
                metrics: self.metrics.clone(),
                tracing: self.tracing.clone(),
                stats: self.stats.clone(),
                nri: self.nri.clone(),
            },
        }
    }

    pub(crate) fn to_table(&self) -> ConfigResult<toml::Table> {
        match toml::Value::try_from(self.to_file_repr())? {
            toml::Value::Table(table) => Ok(table),
            other => Err(ConfigError::Encode {
                message: format!("expected a table, got {}", other.type_str()),
            }),
        }
    }

    pub(crate) fn apply_file_repr(&mut self, file: ConfigFile) {
        let CorralTable {
            root,
            api,
            runtime,
            image,
            network,
            metrics,
            tracing,
            stats,
            nri,
        } = file.corral;
        self.root = root;
        self.api = api;
        self.runtime = runtime;
        self.image = image;
        self.network = network;
        self.metrics = metrics;
        self.tracing = tracing;
        self.stats = stats;
        self.nri = nri;
    }

    pub(crate) fn set_single_config_path(&mut self, path: Option<PathBuf>) {
        self.single_config_path = path;
    }

    pub(crate) fn set_drop_in_config_dir(&mut self, path: Option<PathBuf>) {
        self.drop_in_config_dir = path;
    }
}
