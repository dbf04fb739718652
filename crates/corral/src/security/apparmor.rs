//! AppArmor default profile selection.

use std::path::{Path, PathBuf};

use corral_common::{ConfigError, ConfigResult};

/// Name of the profile corral ships and installs on demand.
pub const DEFAULT_PROFILE: &str = "corral-default";

/// Profile name that disables confinement.
pub const UNCONFINED: &str = "unconfined";

const LOADED_PROFILES: &str = "/sys/kernel/security/apparmor/profiles";

/// AppArmor configuration held by the resolved runtime config.
#[derive(Debug, Clone)]
pub struct AppArmorConfig {
    enabled: bool,
    default_profile: String,
    needs_install: bool,
    profiles_file: PathBuf,
}

impl AppArmorConfig {
    /// Create a configuration for a host where AppArmor is `enabled` or not.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            default_profile: DEFAULT_PROFILE.to_string(),
            needs_install: false,
            profiles_file: PathBuf::from(LOADED_PROFILES),
        }
    }

    /// Read loaded profiles from `path` instead of securityfs.
    #[must_use]
    pub fn with_profiles_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.profiles_file = path.into();
        self
    }

    /// Check if AppArmor is enabled on the system.
    #[cfg(target_os = "linux")]
    #[must_use]
    pub fn host_enabled() -> bool {
        Path::new("/sys/module/apparmor").exists()
            && Path::new("/sys/kernel/security/apparmor").exists()
    }

    #[cfg(not(target_os = "linux"))]
    #[must_use]
    pub fn host_enabled() -> bool {
        false
    }

    /// Select the default profile. An empty name selects [`DEFAULT_PROFILE`].
    ///
    /// # Errors
    ///
    /// Fails for malformed names, and for custom profiles that are not
    /// loaded into the kernel.
    pub fn load_profile(&mut self, name: &str) -> ConfigResult<()> {
        if !self.enabled {
            tracing::debug!("AppArmor is not enabled, skipping profile load");
            return Ok(());
        }

        let name = if name.is_empty() { DEFAULT_PROFILE } else { name };
        validate_name(name)?;

        match name {
            UNCONFINED => {
                tracing::warn!("AppArmor default profile is unconfined");
            }
            DEFAULT_PROFILE => {
                self.needs_install = !self.is_loaded(name)?;
                if self.needs_install {
                    tracing::info!(profile = name, "Default AppArmor profile will be installed");
                }
            }
            custom => {
                if !self.is_loaded(custom)? {
                    return Err(ConfigError::invalid(format!(
                        "AppArmor profile {custom:?} is not loaded"
                    )));
                }
            }
        }

        tracing::info!(profile = name, "Using AppArmor default profile");
        self.default_profile = name.to_string();
        Ok(())
    }

    /// Whether AppArmor confinement is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The selected default profile.
    #[must_use]
    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    /// Whether the shipped default profile still has to be installed.
    #[must_use]
    pub const fn needs_install(&self) -> bool {
        self.needs_install
    }

    fn is_loaded(&self, name: &str) -> ConfigResult<bool> {
        let loaded = match std::fs::read_to_string(&self.profiles_file) {
            Ok(loaded) => loaded,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.profiles_file.clone(),
                    source,
                });
            }
        };
        // Lines look like "corral-default (enforce)".
        Ok(loaded
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .any(|profile| profile == name))
    }
}

fn validate_name(name: &str) -> ConfigResult<()> {
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigError::invalid(format!(
            "invalid AppArmor profile name {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_host_accepts_anything() {
        let mut config = AppArmorConfig::new(false);
        config.load_profile("not loaded anywhere").unwrap();
        assert_eq!(config.default_profile(), DEFAULT_PROFILE);
    }

    #[test]
    fn custom_profile_must_be_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = dir.path().join("profiles");
        std::fs::write(&profiles, "custom-one (enforce)\n").unwrap();

        let mut config = AppArmorConfig::new(true).with_profiles_file(&profiles);
        config.load_profile("custom-one").unwrap();
        assert_eq!(config.default_profile(), "custom-one");

        assert!(config.load_profile("custom-two").is_err());
    }

    #[test]
    fn default_profile_is_marked_for_install() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppArmorConfig::new(true).with_profiles_file(dir.path().join("none"));
        config.load_profile("").unwrap();
        assert!(config.needs_install());
        assert_eq!(config.default_profile(), DEFAULT_PROFILE);
    }

    #[test]
    fn unconfined_is_accepted() {
        let mut config = AppArmorConfig::new(true);
        config.load_profile(UNCONFINED).unwrap();
        assert_eq!(config.default_profile(), UNCONFINED);
    }
}
