//! Intel RDT (resctrl) class configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use corral_common::{ConfigError, ConfigResult};
use serde::Deserialize;

/// Cache and memory-bandwidth allocation of one class or partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RdtAllocation {
    /// L3 cache allocation (percentage or bitmask, per cache id).
    #[serde(default)]
    pub l3_allocation: Option<serde_yaml::Value>,
    /// Memory bandwidth allocation.
    #[serde(default)]
    pub mb_allocation: Option<serde_yaml::Value>,
}

/// A partition of the cache, subdivided into classes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RdtPartition {
    /// Partition-wide allocation.
    #[serde(flatten)]
    pub allocation: RdtAllocation,
    /// Classes carved out of the partition.
    #[serde(default)]
    pub classes: BTreeMap<String, RdtAllocation>,
}

#[derive(Debug, Default, Deserialize)]
struct RdtFile {
    #[serde(default)]
    partitions: BTreeMap<String, RdtPartition>,
}

/// RDT configuration held by the resolved runtime config.
#[derive(Debug, Clone, Default)]
pub struct RdtConfig {
    enabled: bool,
    path: Option<PathBuf>,
    partitions: BTreeMap<String, RdtPartition>,
}

impl RdtConfig {
    /// Create a disabled configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load partitions from `path`. An empty path leaves RDT disabled.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not decode, or when two
    /// partitions define the same class.
    pub fn load(&mut self, path: &Path) -> ConfigResult<()> {
        self.enabled = false;
        self.partitions.clear();
        self.path = None;

        if path.as_os_str().is_empty() {
            tracing::info!("RDT configuration is disabled");
            return Ok(());
        }

        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: RdtFile = serde_yaml::from_str(&data).map_err(|e| ConfigError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut seen = BTreeMap::new();
        for (partition, spec) in &file.partitions {
            for class in spec.classes.keys() {
                if let Some(other) = seen.insert(class.as_str(), partition.as_str()) {
                    return Err(ConfigError::invalid(format!(
                        "RDT class {class:?} defined in partitions {other:?} and {partition:?}"
                    )));
                }
            }
        }

        tracing::info!(path = %path.display(), classes = seen.len(), "Loaded RDT configuration");
        self.partitions = file.partitions;
        self.path = Some(path.to_path_buf());
        self.enabled = true;
        Ok(())
    }

    /// Whether a configuration was loaded.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// The loaded configuration file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Every class name across partitions, sorted.
    #[must_use]
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .partitions
            .values()
            .flat_map(|p| p.classes.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names
    }
}
