//! `[corral]` root table: storage and bookkeeping paths.

use std::path::PathBuf;

use corral_common::paths::{CLEAN_SHUTDOWN_FILE, LOG_DIR, STORAGE_ROOT, STORAGE_RUN_ROOT, VERSION_FILE};
use corral_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

use super::ValidationMode;
use crate::storage::{StorageBackend, StoreOptions};

/// Root table settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootConfig {
    /// Storage graph root.
    pub root: PathBuf,
    /// Storage run root.
    pub runroot: PathBuf,
    /// Separate image store.
    pub imagestore: PathBuf,
    /// Storage graph driver.
    pub storage_driver: String,
    /// Storage driver options, accumulated across fragments.
    pub storage_option: Vec<String>,
    /// Pod and container log directory.
    pub log_dir: PathBuf,
    /// Version file used to detect reboots.
    pub version_file: PathBuf,
    /// Version file that survives reboots.
    pub version_file_persist: PathBuf,
    /// File written on clean shutdown.
    pub clean_shutdown_file: PathBuf,
    /// Wipe containers after a reboot or upgrade.
    pub internal_wipe: bool,
    /// Check and repair storage after an unclean shutdown.
    pub internal_repair: bool,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(STORAGE_ROOT),
            runroot: PathBuf::from(STORAGE_RUN_ROOT),
            imagestore: PathBuf::new(),
            storage_driver: String::new(),
            storage_option: Vec::new(),
            log_dir: PathBuf::from(LOG_DIR),
            version_file: PathBuf::from(VERSION_FILE),
            version_file_persist: PathBuf::new(),
            clean_shutdown_file: PathBuf::from(CLEAN_SHUTDOWN_FILE),
            internal_wipe: true,
            internal_repair: false,
        }
    }
}

impl RootConfig {
    /// Seed the storage fields from the storage subsystem's defaults.
    pub fn apply_store_defaults(&mut self, defaults: StoreOptions) {
        self.root = defaults.graph_root;
        self.runroot = defaults.run_root;
        self.imagestore = defaults.image_store;
        self.storage_driver = defaults.driver;
        self.storage_option = defaults.driver_options;
    }

    /// Marker file noting that the clean shutdown file is supported.
    #[must_use]
    pub fn clean_shutdown_supported_file_name(&self) -> PathBuf {
        let mut name = self.clean_shutdown_file.clone().into_os_string();
        name.push(".supported");
        PathBuf::from(name)
    }

    /// Validate the root table.
    ///
    /// In execution mode the log directory is created and the storage
    /// subsystem is opened; the values it reports replace the configured
    /// ones.
    ///
    /// # Errors
    ///
    /// Fails for a relative or uncreatable log directory, or when storage
    /// cannot be opened.
    pub fn validate(&mut self, mode: ValidationMode, storage: &dyn StorageBackend) -> ConfigResult<()> {
        if !mode.is_execution() {
            return Ok(());
        }

        if !self.log_dir.is_absolute() {
            return Err(ConfigError::invalid("log_dir is not an absolute path"));
        }
        std::fs::create_dir_all(&self.log_dir)
            .map_err(|e| ConfigError::invalid(format!("invalid log_dir: {e}")))?;

        let opened = storage
            .open(&StoreOptions {
                graph_root: self.root.clone(),
                run_root: self.runroot.clone(),
                image_store: self.imagestore.clone(),
                driver: self.storage_driver.clone(),
                driver_options: self.storage_option.clone(),
            })
            .map_err(|e| ConfigError::invalid(format!("failed to get store to set defaults: {e}")))?;

        self.runroot = opened.run_root;
        self.root = opened.graph_root;
        self.storage_driver = opened.driver;
        self.storage_option = opened.driver_options;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ContainersStorage;

    #[test]
    fn clean_shutdown_marker() {
        let root = RootConfig::default();
        assert_eq!(
            root.clean_shutdown_supported_file_name(),
            PathBuf::from(format!("{CLEAN_SHUTDOWN_FILE}.supported"))
        );
    }

    #[test]
    fn static_mode_touches_nothing() {
        let mut root = RootConfig {
            log_dir: PathBuf::from("relative/logs"),
            ..RootConfig::default()
        };
        let storage = ContainersStorage::with_conf("/nonexistent/storage.conf");
        root.validate(ValidationMode::Static, &storage).unwrap();
        assert!(!PathBuf::from("relative/logs").exists());
    }

    #[test]
    fn execution_requires_absolute_log_dir() {
        let mut root = RootConfig {
            log_dir: PathBuf::from("relative/logs"),
            ..RootConfig::default()
        };
        let storage = ContainersStorage::with_conf("/nonexistent/storage.conf");
        let err = root.validate(ValidationMode::Execution, &storage).unwrap_err();
        assert_eq!(err.to_string(), "log_dir is not an absolute path");
    }

    #[test]
    fn execution_takes_storage_values() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("storage.conf");
        std::fs::write(&conf, "[storage]\ndriver = \"vfs\"\n").unwrap();

        let mut root = RootConfig {
            root: dir.path().join("graph"),
            runroot: dir.path().join("run"),
            storage_driver: String::new(),
            log_dir: dir.path().join("logs"),
            ..RootConfig::default()
        };
        root.validate(ValidationMode::Execution, &ContainersStorage::with_conf(&conf))
            .unwrap();
        assert_eq!(root.storage_driver, "vfs");
        assert!(dir.path().join("logs").is_dir());
        assert!(dir.path().join("graph").is_dir());
    }
}
