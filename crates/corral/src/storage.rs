//! Storage subsystem seam.
//!
//! The image and layer store is owned by a separate subsystem with its own
//! configuration file. The resolver reads that file for defaults and, in
//! execution mode, opens the store to learn the values it actually uses.

use std::fmt;
use std::path::{Path, PathBuf};

use corral_common::paths::{STORAGE_CONF, STORAGE_ROOT, STORAGE_RUN_ROOT};
use corral_common::{ConfigError, ConfigResult};

const PROC_FILESYSTEMS: &str = "/proc/filesystems";

/// Options the storage subsystem is opened with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Persistent data root.
    pub graph_root: PathBuf,
    /// Runtime state root.
    pub run_root: PathBuf,
    /// Separate image store, if any.
    pub image_store: PathBuf,
    /// Graph driver name.
    pub driver: String,
    /// Driver options (`<driver>.<key>=<value>`).
    pub driver_options: Vec<String>,
}

/// Access to the storage subsystem.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Defaults from the storage subsystem's own configuration.
    ///
    /// # Errors
    ///
    /// Fails when its configuration exists but cannot be read or parsed.
    fn defaults(&self) -> ConfigResult<StoreOptions>;

    /// Open the store with `options` and return the values it runs with.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be initialised.
    fn open(&self, options: &StoreOptions) -> ConfigResult<StoreOptions>;
}

/// Storage configured through `storage.conf`.
#[derive(Debug, Clone)]
pub struct ContainersStorage {
    conf_path: PathBuf,
}

impl ContainersStorage {
    /// Use the system `storage.conf`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_conf(STORAGE_CONF)
    }

    /// Use the `storage.conf` at `path`.
    pub fn with_conf(path: impl Into<PathBuf>) -> Self {
        Self {
            conf_path: path.into(),
        }
    }

    /// Path of the configuration file read by [`StorageBackend::defaults`].
    #[must_use]
    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }
}

impl Default for ContainersStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for ContainersStorage {
    fn defaults(&self) -> ConfigResult<StoreOptions> {
        let mut options = StoreOptions {
            graph_root: PathBuf::from(STORAGE_ROOT),
            run_root: PathBuf::from(STORAGE_RUN_ROOT),
            ..StoreOptions::default()
        };

        let data = match std::fs::read_to_string(&self.conf_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.conf_path.display(), "No storage configuration, using built-in defaults");
                return Ok(options);
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.conf_path.clone(),
                    source,
                });
            }
        };

        let table: toml::Table = toml::from_str(&data).map_err(|e| ConfigError::Decode {
            path: self.conf_path.clone(),
            message: e.to_string(),
        })?;
        let Some(storage) = table.get("storage").and_then(toml::Value::as_table) else {
            return Ok(options);
        };

        let string = |key: &str| storage.get(key).and_then(toml::Value::as_str).filter(|s| !s.is_empty());
        if let Some(driver) = string("driver") {
            options.driver = driver.to_string();
        }
        if let Some(root) = string("graphroot") {
            options.graph_root = PathBuf::from(root);
        }
        if let Some(run_root) = string("runroot") {
            options.run_root = PathBuf::from(run_root);
        }
        if let Some(image_store) = string("imagestore") {
            options.image_store = PathBuf::from(image_store);
        }

        if let Some(driver_tables) = storage.get("options").and_then(toml::Value::as_table) {
            for (driver, values) in driver_tables {
                let Some(values) = values.as_table() else {
                    continue;
                };
                if !options.driver.is_empty() && *driver != options.driver {
                    continue;
                }
                for (key, value) in values {
                    let rendered = value
                        .as_str()
                        .map_or_else(|| value.to_string(), str::to_string);
                    options.driver_options.push(format!("{driver}.{key}={rendered}"));
                }
            }
        }

        Ok(options)
    }

    fn open(&self, options: &StoreOptions) -> ConfigResult<StoreOptions> {
        let defaults = self.defaults()?;
        let mut opened = options.clone();

        if opened.graph_root.as_os_str().is_empty() {
            opened.graph_root = defaults.graph_root;
        }
        if opened.run_root.as_os_str().is_empty() {
            opened.run_root = defaults.run_root;
        }
        if opened.image_store.as_os_str().is_empty() {
            opened.image_store = defaults.image_store;
        }
        if opened.driver_options.is_empty() {
            opened.driver_options = defaults.driver_options;
        }
        if opened.driver.is_empty() {
            opened.driver = if defaults.driver.is_empty() {
                detect_driver()
            } else {
                defaults.driver
            };
        }

        for dir in [&opened.graph_root, &opened.run_root] {
            std::fs::create_dir_all(dir).map_err(|e| {
                ConfigError::invalid(format!("creating storage directory {}: {e}", dir.display()))
            })?;
        }
        if !opened.image_store.as_os_str().is_empty() {
            std::fs::create_dir_all(&opened.image_store)?;
        }

        tracing::info!(
            graph_root = %opened.graph_root.display(),
            run_root = %opened.run_root.display(),
            driver = %opened.driver,
            "Opened storage"
        );
        Ok(opened)
    }
}

/// `overlay` when the kernel lists it, otherwise `vfs`.
fn detect_driver() -> String {
    let overlay = std::fs::read_to_string(PROC_FILESYSTEMS)
        .map(|fs| fs.lines().any(|line| line.split_whitespace().last() == Some("overlay")))
        .unwrap_or(false);
    if overlay { "overlay" } else { "vfs" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_conf_uses_builtin_defaults() {
        let storage = ContainersStorage::with_conf("/nonexistent/storage.conf");
        let defaults = storage.defaults().unwrap();
        assert_eq!(defaults.graph_root, Path::new(STORAGE_ROOT));
        assert_eq!(defaults.run_root, Path::new(STORAGE_RUN_ROOT));
        assert!(defaults.driver.is_empty());
    }

    #[test]
    fn reads_storage_conf() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("storage.conf");
        std::fs::write(
            &conf,
            r#"
[storage]
driver = "overlay"
graphroot = "/data/graph"
runroot = "/run/graph"

[storage.options.overlay]
mountopt = "nodev,metacopy=on"

[storage.options.btrfs]
min_space = "10G"
"#,
        )
        .unwrap();

        let defaults = ContainersStorage::with_conf(&conf).defaults().unwrap();
        assert_eq!(defaults.driver, "overlay");
        assert_eq!(defaults.graph_root, Path::new("/data/graph"));
        assert_eq!(defaults.run_root, Path::new("/run/graph"));
        assert_eq!(defaults.driver_options, ["overlay.mountopt=nodev,metacopy=on"]);
    }

    #[test]
    fn bad_conf_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("storage.conf");
        std::fs::write(&conf, "[storage\n").unwrap();
        let err = ContainersStorage::with_conf(&conf).defaults().unwrap_err();
        assert!(err.to_string().contains("storage.conf"));
    }

    #[test]
    fn open_fills_and_creates() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("storage.conf");
        let graph = dir.path().join("graph");
        std::fs::write(
            &conf,
            format!("[storage]\ndriver = \"vfs\"\ngraphroot = \"{}\"\n", graph.display()),
        )
        .unwrap();

        let run = dir.path().join("run");
        let opened = ContainersStorage::with_conf(&conf)
            .open(&StoreOptions {
                run_root: run.clone(),
                ..StoreOptions::default()
            })
            .unwrap();
        assert_eq!(opened.graph_root, graph);
        assert_eq!(opened.run_root, run);
        assert_eq!(opened.driver, "vfs");
        assert!(graph.is_dir() && run.is_dir());
    }
}
