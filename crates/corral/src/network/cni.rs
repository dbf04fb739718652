//! CNI network configuration manager.

use std::path::{Path, PathBuf};

use corral_common::{ConfigError, ConfigResult};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::watch;

const CONFIG_EXTENSIONS: [&str; 3] = ["conf", "conflist", "json"];

/// A network found in the configuration directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CniNetwork {
    /// Network name from the document.
    pub name: String,
    /// CNI spec version.
    pub cni_version: String,
    /// File the network was read from.
    pub path: PathBuf,
    /// Plugin types in chain order.
    pub plugin_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkDocument {
    #[serde(default)]
    cni_version: String,
    name: String,
    #[serde(rename = "type")]
    plugin_type: Option<String>,
    #[serde(default)]
    plugins: Vec<PluginDocument>,
}

#[derive(Debug, Deserialize)]
struct PluginDocument {
    #[serde(rename = "type")]
    plugin_type: String,
}

/// Tracks the default pod network and notifies watchers when it appears
/// or goes away.
#[derive(Debug)]
pub struct CniManager {
    default_network: String,
    network_dir: PathBuf,
    plugin_dirs: Vec<PathBuf>,
    current: Mutex<Option<CniNetwork>>,
    notifier: Mutex<Option<watch::Sender<bool>>>,
    receiver: watch::Receiver<bool>,
}

impl CniManager {
    /// Scan `network_dir` and build a manager.
    ///
    /// A directory without networks is not an error; the manager starts
    /// out not ready.
    ///
    /// # Errors
    ///
    /// Fails when `network_dir` exists but cannot be listed.
    pub fn new(
        default_network: impl Into<String>,
        network_dir: impl Into<PathBuf>,
        plugin_dirs: Vec<PathBuf>,
    ) -> ConfigResult<Self> {
        let (tx, rx) = watch::channel(false);
        let manager = Self {
            default_network: default_network.into(),
            network_dir: network_dir.into(),
            plugin_dirs,
            current: Mutex::new(None),
            notifier: Mutex::new(Some(tx)),
            receiver: rx,
        };
        manager.rescan()?;
        Ok(manager)
    }

    /// Re-read the network directory and notify watchers if readiness
    /// changed. Returns the new readiness.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be listed.
    pub fn rescan(&self) -> ConfigResult<bool> {
        let found = find_default_network(&self.network_dir, &self.default_network)?;
        let ready = found.is_some();

        match &found {
            Some(network) => tracing::info!(
                network = %network.name,
                path = %network.path.display(),
                "Found CNI network"
            ),
            None => tracing::debug!(dir = %self.network_dir.display(), "No CNI network found"),
        }

        *self.current.lock() = found;
        if let Some(tx) = self.notifier.lock().as_ref() {
            tx.send_if_modified(|state| {
                let changed = *state != ready;
                *state = ready;
                changed
            });
        }
        Ok(ready)
    }

    /// `Ok` once the default network is available.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NetworkNotReady`] otherwise.
    pub fn ready_or_error(&self) -> ConfigResult<()> {
        if self.current.lock().is_some() {
            return Ok(());
        }
        let message = if self.default_network.is_empty() {
            format!("no CNI configuration file in {}", self.network_dir.display())
        } else {
            format!(
                "CNI network {:?} not found in {}",
                self.default_network,
                self.network_dir.display()
            )
        };
        Err(ConfigError::NetworkNotReady { message })
    }

    /// Subscribe to readiness changes. The current value is readable
    /// immediately.
    #[must_use]
    pub fn add_watcher(&self) -> watch::Receiver<bool> {
        self.receiver.clone()
    }

    /// Stop notifying watchers. Their `changed()` calls return an error
    /// afterwards.
    pub fn shutdown(&self) {
        if self.notifier.lock().take().is_some() {
            tracing::debug!("CNI manager shut down");
        }
    }

    /// The selected default network.
    #[must_use]
    pub fn default_network(&self) -> Option<CniNetwork> {
        self.current.lock().clone()
    }

    /// Directories searched for plugin binaries.
    #[must_use]
    pub fn plugin_dirs(&self) -> &[PathBuf] {
        &self.plugin_dirs
    }

    /// The watched configuration directory.
    #[must_use]
    pub fn network_dir(&self) -> &Path {
        &self.network_dir
    }
}

fn find_default_network(dir: &Path, wanted: &str) -> ConfigResult<Option<CniNetwork>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext))
        })
        .collect();
    files.sort();

    for path in files {
        let network = match load_network(&path) {
            Ok(network) => network,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping invalid CNI configuration");
                continue;
            }
        };
        if wanted.is_empty() || network.name == wanted {
            return Ok(Some(network));
        }
    }
    Ok(None)
}

fn load_network(path: &Path) -> ConfigResult<CniNetwork> {
    let data = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let doc: NetworkDocument = serde_json::from_slice(&data).map_err(|e| ConfigError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let plugin_types: Vec<String> = match doc.plugin_type {
        Some(single) => vec![single],
        None => doc.plugins.into_iter().map(|p| p.plugin_type).collect(),
    };
    if plugin_types.is_empty() {
        return Err(ConfigError::Decode {
            path: path.to_path_buf(),
            message: "network has no plugins".to_string(),
        });
    }

    Ok(CniNetwork {
        name: doc.name,
        cni_version: doc.cni_version,
        path: path.to_path_buf(),
        plugin_types,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BRIDGE: &str = r#"{"cniVersion": "1.0.0", "name": "podnet", "plugins": [{"type": "bridge"}, {"type": "portmap"}]}"#;

    #[test]
    fn empty_dir_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CniManager::new("", dir.path(), Vec::new()).unwrap();
        assert!(matches!(
            manager.ready_or_error(),
            Err(ConfigError::NetworkNotReady { .. })
        ));
    }

    #[test]
    fn picks_first_file_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20-other.conf"), r#"{"name": "other", "type": "macvlan"}"#).unwrap();
        std::fs::write(dir.path().join("10-podnet.conflist"), BRIDGE).unwrap();
        std::fs::write(dir.path().join("README"), "not a network").unwrap();

        let manager = CniManager::new("", dir.path(), Vec::new()).unwrap();
        manager.ready_or_error().unwrap();
        let network = manager.default_network().unwrap();
        assert_eq!(network.name, "podnet");
        assert_eq!(network.plugin_types, ["bridge", "portmap"]);
    }

    #[test]
    fn named_default_network() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("10-podnet.conflist"), BRIDGE).unwrap();
        std::fs::write(dir.path().join("20-other.conf"), r#"{"name": "other", "type": "macvlan"}"#).unwrap();

        let manager = CniManager::new("other", dir.path(), Vec::new()).unwrap();
        assert_eq!(manager.default_network().unwrap().plugin_types, ["macvlan"]);

        let missing = CniManager::new("absent", dir.path(), Vec::new()).unwrap();
        assert!(missing.ready_or_error().is_err());
    }

    #[tokio::test]
    async fn watchers_see_readiness_flip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CniManager::new("", dir.path(), Vec::new()).unwrap();
        let mut watcher = manager.add_watcher();
        assert!(!*watcher.borrow());

        std::fs::write(dir.path().join("10-podnet.conflist"), BRIDGE).unwrap();
        assert!(manager.rescan().unwrap());
        watcher.changed().await.unwrap();
        assert!(*watcher.borrow_and_update());

        manager.shutdown();
        assert!(watcher.changed().await.is_err());
    }
}
