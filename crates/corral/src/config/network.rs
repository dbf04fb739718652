//! `[corral.network]`: pod network plugin settings.

use std::path::PathBuf;

use corral_common::paths::{CNI_BIN_DIR, CNI_CONFIG_DIR};
use corral_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

use super::{ValidationMode, is_empty_path};
use crate::network::CniManager;

/// Network plugin settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network used for pods. Empty picks the first one found.
    pub cni_default_network: String,
    /// Directory holding network configuration files.
    pub network_dir: PathBuf,
    /// Single plugin directory. Deprecated in favour of `plugin_dirs`.
    #[serde(skip_serializing_if = "is_empty_path")]
    pub plugin_dir: PathBuf,
    /// Directories searched for plugin binaries.
    pub plugin_dirs: Vec<PathBuf>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cni_default_network: String::new(),
            network_dir: PathBuf::from(CNI_CONFIG_DIR),
            plugin_dir: PathBuf::new(),
            plugin_dirs: vec![PathBuf::from(CNI_BIN_DIR)],
        }
    }
}

impl NetworkConfig {
    /// In execution mode create the network and plugin directories, fold
    /// `plugin_dir` into `plugin_dirs` and start the plugin manager.
    ///
    /// Static mode checks nothing and returns `None`.
    ///
    /// # Errors
    ///
    /// Fails when a directory cannot be created or the network directory
    /// cannot be scanned.
    pub fn validate(&mut self, mode: ValidationMode) -> ConfigResult<Option<CniManager>> {
        if !mode.is_execution() {
            return Ok(None);
        }

        match std::fs::metadata(&self.network_dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(ConfigError::invalid(format!(
                    "invalid network_dir: {}: not a directory",
                    self.network_dir.display()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::create_dir_all(&self.network_dir).map_err(|e| {
                    ConfigError::invalid(format!(
                        "cannot create network_dir: {}: {e}",
                        self.network_dir.display()
                    ))
                })?;
            }
            Err(e) => {
                return Err(ConfigError::invalid(format!(
                    "invalid network_dir: {}: {e}",
                    self.network_dir.display()
                )));
            }
        }

        for dir in &self.plugin_dirs {
            std::fs::create_dir_all(dir)
                .map_err(|e| ConfigError::invalid(format!("invalid plugin_dirs entry: {e}")))?;
        }

        if !is_empty_path(&self.plugin_dir) {
            tracing::warn!("The config field plugin_dir is being deprecated. Please use plugin_dirs instead");
            std::fs::create_dir_all(&self.plugin_dir)
                .map_err(|e| ConfigError::invalid(format!("invalid plugin_dir entry: {e}")))?;
            self.plugin_dirs.push(std::mem::take(&mut self.plugin_dir));
        }

        let manager = CniManager::new(
            self.cni_default_network.clone(),
            self.network_dir.clone(),
            self.plugin_dirs.clone(),
        )
        .map_err(|e| ConfigError::invalid(format!("initialize CNI plugin: {e}")))?;
        Ok(Some(manager))
    }
}
