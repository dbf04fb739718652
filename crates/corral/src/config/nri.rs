//! `[corral.nri]`: Node Resource Interface plugin settings.

use std::path::PathBuf;
use std::time::Duration;

use corral_common::paths::{NRI_PLUGIN_CONFIG_DIR, NRI_PLUGIN_DIR, NRI_SOCKET};
use corral_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

use super::ValidationMode;

/// NRI settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NriConfig {
    /// Accept NRI plugins.
    pub enable_nri: bool,
    /// Socket plugins connect to.
    pub nri_listen: PathBuf,
    /// Directory of plugins started by the runtime.
    pub nri_plugin_dir: PathBuf,
    /// Directory of plugin configuration.
    pub nri_plugin_config_dir: PathBuf,
    /// How long a plugin may take to register (`5s`, `500ms`).
    pub nri_plugin_registration_timeout: String,
    /// How long a plugin may take to answer a request.
    pub nri_plugin_request_timeout: String,
    /// Refuse externally started plugins.
    pub nri_disable_connections: bool,
}

impl Default for NriConfig {
    fn default() -> Self {
        Self {
            enable_nri: true,
            nri_listen: PathBuf::from(NRI_SOCKET),
            nri_plugin_dir: PathBuf::from(NRI_PLUGIN_DIR),
            nri_plugin_config_dir: PathBuf::from(NRI_PLUGIN_CONFIG_DIR),
            nri_plugin_registration_timeout: "5s".to_string(),
            nri_plugin_request_timeout: "2s".to_string(),
            nri_disable_connections: false,
        }
    }
}

impl NriConfig {
    /// Parsed registration timeout.
    ///
    /// # Errors
    ///
    /// Fails when the value is not a duration.
    pub fn registration_timeout(&self) -> ConfigResult<Duration> {
        parse_timeout("nri_plugin_registration_timeout", &self.nri_plugin_registration_timeout)
    }

    /// Parsed request timeout.
    ///
    /// # Errors
    ///
    /// Fails when the value is not a duration.
    pub fn request_timeout(&self) -> ConfigResult<Duration> {
        parse_timeout("nri_plugin_request_timeout", &self.nri_plugin_request_timeout)
    }

    /// Check the timeouts. In execution mode with NRI enabled, create the
    /// plugin directories and the socket's parent.
    ///
    /// # Errors
    ///
    /// Fails for malformed timeouts or directories that cannot be created.
    pub fn validate(&self, mode: ValidationMode) -> ConfigResult<()> {
        if !self.enable_nri {
            return Ok(());
        }
        self.registration_timeout()?;
        self.request_timeout()?;

        if mode.is_execution() {
            let socket_dir = self.nri_listen.parent().map(PathBuf::from);
            for dir in [Some(self.nri_plugin_dir.clone()), Some(self.nri_plugin_config_dir.clone()), socket_dir]
                .into_iter()
                .flatten()
                .filter(|dir| !dir.as_os_str().is_empty())
            {
                std::fs::create_dir_all(&dir).map_err(|e| {
                    ConfigError::invalid(format!("creating NRI directory {}: {e}", dir.display()))
                })?;
            }
        }
        Ok(())
    }
}

fn parse_timeout(field: &str, value: &str) -> ConfigResult<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ConfigError::invalid(format!("invalid {field} {value:?}: {e}")))
}
