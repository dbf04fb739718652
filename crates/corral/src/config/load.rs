//! Folding configuration fragments into a [`Config`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use corral_common::{ConfigError, ConfigResult};
use walkdir::WalkDir;

use super::{Config, ConfigFile};

/// Tables whose entries a fragment replaces as a whole instead of merging
/// key by key.
const ENTRY_REPLACED_TABLES: [&[&str]; 2] = [
    &["corral", "runtime", "runtimes"],
    &["corral", "runtime", "workloads"],
];

impl Config {
    /// Fold the primary configuration file at `path` into this config and
    /// remember it for reloads.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or decoded; the config is left
    /// untouched in that case.
    pub fn update_from_file(&mut self, path: &Path) -> ConfigResult<()> {
        self.update_from_drop_in_file(path)?;
        self.set_single_config_path(Some(path.to_path_buf()));
        Ok(())
    }

    /// Fold one fragment into this config.
    ///
    /// Keys present in the fragment override the current value. Storage
    /// options accumulate and are de-duplicated. An empty `root`, `runroot`
    /// or `storage_driver` keeps the previous value.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or decoded; the config is left
    /// untouched in that case.
    pub fn update_from_drop_in_file(&mut self, path: &Path) -> ConfigResult<()> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge_str(path, &data)
    }

    /// Fold every file below `dir` into this config, in path order, and
    /// remember the directory for reloads. A missing directory is skipped.
    ///
    /// # Errors
    ///
    /// Fails on the first fragment that cannot be read or decoded. The config
    /// is left untouched in that case.
    pub fn update_from_path(&mut self, dir: &Path) -> ConfigResult<()> {
        if !dir.exists() {
            tracing::debug!(path = %dir.display(), "Skipping missing drop-in directory");
            return Ok(());
        }

        let mut staged = self.clone();
        for path in drop_in_files(dir)? {
            tracing::debug!(path = %path.display(), "Merging drop-in configuration");
            staged.update_from_drop_in_file(&path)?;
        }
        staged.set_drop_in_config_dir(Some(dir.to_path_buf()));
        *self = staged;
        Ok(())
    }

    pub(crate) fn merge_str(&mut self, path: &Path, data: &str) -> ConfigResult<()> {
        let decode_error = |message: String| ConfigError::Decode {
            path: path.to_path_buf(),
            message,
        };

        let fragment: toml::Table = toml::from_str(data).map_err(|e| decode_error(e.to_string()))?;

        let previous_options = self.root.storage_option.clone();
        let previous_root = self.root.root.clone();
        let previous_runroot = self.root.runroot.clone();
        let previous_driver = self.root.storage_driver.clone();
        let probe_timeout = self.runtime.features_probe_timeout;

        let mut merged = self.to_table()?;
        merge_tables(&mut merged, fragment, &mut Vec::new());

        let mut file: ConfigFile = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| decode_error(e.message().to_string()))?;

        let root = &mut file.corral.root;
        let mut options = previous_options;
        options.append(&mut root.storage_option);
        root.storage_option = remove_dup_storage_opts(options);
        if is_empty(&root.root) {
            root.root = previous_root;
        }
        if is_empty(&root.runroot) {
            root.runroot = previous_runroot;
        }
        if root.storage_driver.is_empty() {
            root.storage_driver = previous_driver;
        }

        if !file.corral.image.registries.is_empty() {
            file.corral.image.registries.clear();
            tracing::warn!(
                path = %path.display(),
                "Support for the 'registries' option has been dropped; configure unqualified-search registries in registries.conf instead"
            );
        }

        file.corral.runtime.features_probe_timeout = probe_timeout;
        self.apply_file_repr(file);
        Ok(())
    }
}

fn is_empty(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

fn drop_in_files(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            match e.into_io_error() {
                Some(source) => ConfigError::Read { path, source },
                None => ConfigError::invalid(format!(
                    "filesystem loop below {}",
                    dir.display()
                )),
            }
        })?;
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key, except
/// entries of [`ENTRY_REPLACED_TABLES`]; every other value present in
/// `overlay` replaces the one in `base`.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table, path: &mut Vec<String>) {
    for (key, value) in overlay {
        let replace_entry = ENTRY_REPLACED_TABLES
            .iter()
            .any(|table| table.len() == path.len() && table.iter().zip(path.iter()).all(|(a, b)| *a == b.as_str()));
        let merge_nested =
            !replace_entry && value.is_table() && base.get(&key).is_some_and(toml::Value::is_table);

        if merge_nested {
            if let (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) =
                (base.get_mut(&key), value)
            {
                path.push(key);
                merge_tables(existing, nested, path);
                path.pop();
            }
        } else {
            base.insert(key, value);
        }
    }
}

/// De-duplicate storage options, keeping the last occurrence of each
/// value in place.
#[must_use]
pub fn remove_dup_storage_opts(options: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut kept: Vec<String> = options
        .into_iter()
        .rev()
        .filter(|option| seen.insert(option.clone()))
        .collect();
    kept.reverse();
    kept
}
