//! Block I/O class configuration.
//!
//! Classes map a name to per-device throttling rules. Workloads pick a class
//! by annotation; the cgroup layer turns the rules into `io.max` and
//! `io.weight` writes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use corral_common::{ConfigError, ConfigResult};
use serde::Deserialize;

/// Throttling rule applied to a set of devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct BlockIoDeviceRule {
    /// Device globs the rule applies to (e.g. `/dev/sd[a-z]`).
    #[serde(default)]
    pub devices: Vec<String>,
    /// Proportional weight (10-1000).
    pub weight: Option<u32>,
    /// Read bytes per second (`"50M"`, `"1G"`, raw bytes).
    pub throttlereadbps: Option<String>,
    /// Write bytes per second.
    pub throttlewritebps: Option<String>,
    /// Read operations per second.
    pub throttlereadiops: Option<String>,
    /// Write operations per second.
    pub throttlewriteiops: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlockIoFile {
    #[serde(default)]
    classes: BTreeMap<String, Vec<BlockIoDeviceRule>>,
}

/// Block I/O configuration held by the resolved runtime config.
#[derive(Debug, Clone, Default)]
pub struct BlockIoConfig {
    enabled: bool,
    reload: bool,
    path: Option<PathBuf>,
    classes: BTreeMap<String, Vec<BlockIoDeviceRule>>,
}

impl BlockIoConfig {
    /// Create a disabled configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load classes from `path`. An empty path leaves block I/O disabled.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not decode.
    pub fn load(&mut self, path: &Path) -> ConfigResult<()> {
        self.enabled = false;
        self.classes.clear();
        self.path = None;

        if path.as_os_str().is_empty() {
            tracing::info!("Block I/O configuration is disabled");
            return Ok(());
        }

        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: BlockIoFile = serde_yaml::from_str(&data).map_err(|e| ConfigError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        for (class, rules) in &file.classes {
            for rule in rules {
                validate_rule(class, rule)?;
            }
        }

        tracing::info!(
            path = %path.display(),
            classes = file.classes.len(),
            "Loaded block I/O configuration"
        );
        self.classes = file.classes;
        self.path = Some(path.to_path_buf());
        self.enabled = true;
        Ok(())
    }

    /// Whether classes were loaded.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Re-read the class file when it changes.
    #[must_use]
    pub const fn reload_required(&self) -> bool {
        self.reload
    }

    /// Set whether the class file is re-read on change.
    pub fn set_reload_required(&mut self, reload: bool) {
        self.reload = reload;
    }

    /// The loaded class file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Names of the loaded classes, sorted.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Rules of one class.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<&[BlockIoDeviceRule]> {
        self.classes.get(name).map(Vec::as_slice)
    }
}

fn validate_rule(class: &str, rule: &BlockIoDeviceRule) -> ConfigResult<()> {
    if let Some(weight) = rule.weight.filter(|w| !(10..=1000).contains(w)) {
        return Err(ConfigError::invalid(format!(
            "block I/O class {class:?}: weight {weight} out of range 10-1000"
        )));
    }
    for value in [
        &rule.throttlereadbps,
        &rule.throttlewritebps,
        &rule.throttlereadiops,
        &rule.throttlewriteiops,
    ]
    .into_iter()
    .flatten()
    {
        parse_quantity(value).ok_or_else(|| {
            ConfigError::invalid(format!(
                "block I/O class {class:?}: invalid throttle value {value:?}"
            ))
        })?;
    }
    Ok(())
}

/// Parse a throttle quantity with an optional `k`, `M`, `G` or `T` suffix.
#[must_use]
pub fn parse_quantity(value: &str) -> Option<u64> {
    let value = value.trim();
    let (digits, multiplier) = match value.char_indices().last()? {
        (i, 'k' | 'K') => (&value[..i], 1u64 << 10),
        (i, 'm' | 'M') => (&value[..i], 1 << 20),
        (i, 'g' | 'G') => (&value[..i], 1 << 30),
        (i, 't' | 'T') => (&value[..i], 1 << 40),
        _ => (value, 1),
    };
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}
