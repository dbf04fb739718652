//! Namespace manager.

use std::path::{Path, PathBuf};

use corral_common::{ConfigError, ConfigResult};
use corral_oci::NamespaceType;

/// Owns the directories pinned pod namespaces are bind-mounted into.
#[derive(Debug, Clone)]
pub struct NamespaceManager {
    namespaces_dir: PathBuf,
    pinns_path: PathBuf,
}

impl NamespaceManager {
    /// Create a manager rooted at `namespaces_dir` that pins with `pinns_path`.
    pub fn new(namespaces_dir: impl Into<PathBuf>, pinns_path: impl Into<PathBuf>) -> Self {
        Self {
            namespaces_dir: namespaces_dir.into(),
            pinns_path: pinns_path.into(),
        }
    }

    /// Create one directory per pinnable namespace type.
    ///
    /// # Errors
    ///
    /// Returns an error when a directory cannot be created.
    pub fn initialize(&self) -> ConfigResult<()> {
        for ns_type in NamespaceType::PINNABLE {
            let dir = self.dir_for(ns_type);
            std::fs::create_dir_all(&dir).map_err(|e| {
                ConfigError::invalid(format!(
                    "invalid namespaces_dir: creating {}: {e}",
                    dir.display()
                ))
            })?;
            tracing::debug!(namespace = %ns_type, path = %dir.display(), "Created namespace directory");
        }
        Ok(())
    }

    /// Directory holding pinned namespaces of `ns_type` (`<dir>/<name>ns`).
    #[must_use]
    pub fn dir_for(&self, ns_type: NamespaceType) -> PathBuf {
        self.namespaces_dir.join(format!("{}ns", ns_type.kernel_name()))
    }

    /// Root of the managed namespace directories.
    #[must_use]
    pub fn namespaces_dir(&self) -> &Path {
        &self.namespaces_dir
    }

    /// The helper binary that pins namespaces.
    #[must_use]
    pub fn pinns_path(&self) -> &Path {
        &self.pinns_path
    }
}
