//! Live configuration reload.

use std::sync::Arc;

use corral_common::ConfigResult;
use parking_lot::RwLock;

use super::{Config, ResolvedConfig, ValidationMode, resolve};
use crate::host::HostEnv;
use crate::storage::StorageBackend;

/// Shared handle to the active configuration.
///
/// Readers take a snapshot with [`ConfigHandle::current`]; a reload swaps
/// in a new snapshot without disturbing the ones already handed out.
#[derive(Debug)]
pub struct ConfigHandle {
    current: RwLock<Arc<ResolvedConfig>>,
    host: Arc<dyn HostEnv>,
    storage: Arc<dyn StorageBackend>,
}

impl ConfigHandle {
    /// Wrap an already resolved configuration.
    pub fn new(resolved: ResolvedConfig, host: Arc<dyn HostEnv>, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            current: RwLock::new(Arc::new(resolved)),
            host,
            storage,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn current(&self) -> Arc<ResolvedConfig> {
        Arc::clone(&self.current.read())
    }

    /// Re-read the files the active configuration was loaded from.
    ///
    /// The new files are validated statically. A configuration resolved in
    /// static mode is replaced as a whole. A running configuration only
    /// takes over the reloadable settings (log level and filter, security
    /// profiles, block I/O and RDT classes, pause image, pinned images,
    /// insecure registries, decryption keys); its managers are kept.
    ///
    /// # Errors
    ///
    /// Fails when a file cannot be read or the new configuration is invalid.
    /// The active configuration is unchanged in that case.
    pub async fn reload(&self) -> ConfigResult<Arc<ResolvedConfig>> {
        let previous = self.current();

        let mut config = Config::new_default(&*self.storage, &*self.host)?;
        config.runtime.features_probe_timeout = previous.config().runtime.features_probe_timeout;
        if let Some(path) = previous.config().single_config_path() {
            if path.exists() {
                config.update_from_file(path)?;
            }
        }
        if let Some(dir) = previous.config().drop_in_config_dir() {
            config.update_from_path(dir)?;
        }
        let fresh = resolve(config, ValidationMode::Static, &*self.host, &*self.storage).await?;

        let next = match previous.mode() {
            ValidationMode::Static => fresh,
            ValidationMode::Execution => {
                let (mut config, mut subsystems) = (*previous).clone().into_parts();
                if apply_reloadable(&mut config, fresh.config()) {
                    subsystems.load_security(&config.runtime, &*self.host)?;
                }
                ResolvedConfig::from_parts(config, subsystems, ValidationMode::Execution)
            }
        };

        let next = Arc::new(next);
        *self.current.write() = Arc::clone(&next);
        tracing::info!("Configuration reloaded");
        Ok(next)
    }
}

/// Copy the settings a running configuration may change. Returns whether a
/// security setting changed.
fn apply_reloadable(current: &mut Config, fresh: &Config) -> bool {
    macro_rules! reload {
        ($($table:ident . $field:ident),+ $(,)?) => {{
            let mut changed = false;
            $(
                if current.$table.$field != fresh.$table.$field {
                    tracing::info!(
                        option = stringify!($field),
                        from = ?current.$table.$field,
                        to = ?fresh.$table.$field,
                        "Reloaded configuration option"
                    );
                    current.$table.$field.clone_from(&fresh.$table.$field);
                    changed = true;
                }
            )+
            changed
        }};
    }

    reload!(
        runtime.log_level,
        runtime.log_filter,
        image.pause_image,
        image.pause_image_auth_file,
        image.pause_command,
        image.pinned_images,
        image.insecure_registries,
        runtime.decryption_keys_path,
    );
    reload!(
        runtime.seccomp_profile,
        runtime.apparmor_profile,
        runtime.blockio_config_file,
        runtime.blockio_reload,
        runtime.rdt_config_file,
    )
}
