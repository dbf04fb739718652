//! Integration tests for live configuration reload.

mod common;

use std::path::Path;
use std::sync::Arc;

use corral::config::{Config, ConfigHandle, ValidationMode, resolve};
use corral::host::HostEnv;
use corral::storage::StorageBackend;
use tempfile::tempdir;

use common::{FakeHost, MemoryStorage, sandboxed_config};

async fn handle(dir: &Path, path: &Path, mode: ValidationMode) -> ConfigHandle {
    let host: Arc<dyn HostEnv> = Arc::new(FakeHost::complete(dir));
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());
    let config = Config::load(path, &dir.join("corral.conf.d"), &*storage, &*host).unwrap();
    let resolved = resolve(config, mode, &*host, &*storage).await.unwrap();
    ConfigHandle::new(resolved, host, storage)
}

fn edit(path: &Path, dir: &Path, change: impl FnOnce(&mut Config)) {
    let mut config = sandboxed_config(dir);
    change(&mut config);
    config.to_file(path).unwrap();
}

#[tokio::test]
async fn test_running_config_only_takes_reloadable_options() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("corral.conf");
    edit(&path, temp.path(), |_| {});

    let handle = handle(temp.path(), &path, ValidationMode::Execution).await;
    let before = handle.current();
    assert_eq!(before.config().runtime.log_level, "info");

    edit(&path, temp.path(), |config| {
        config.runtime.log_level = "debug".to_string();
        config.runtime.ctr_stop_timeout = 120;
        config.image.pinned_images = vec!["quay.io/app:1".to_string()];
    });
    let after = handle.reload().await.unwrap();

    assert_eq!(after.mode(), ValidationMode::Execution);
    assert_eq!(after.config().runtime.log_level, "debug");
    assert_eq!(after.config().image.pinned_images, ["quay.io/app:1"]);
    assert_eq!(after.config().runtime.ctr_stop_timeout, 30);
    assert!(after.subsystems().cgroup_manager().is_some());
    assert!(after.subsystems().monitor("runc").is_some());

    // Earlier snapshots are unaffected.
    assert_eq!(before.config().runtime.log_level, "info");
    assert!(Arc::ptr_eq(&after, &handle.current()));
}

#[tokio::test]
async fn test_static_config_is_replaced() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("corral.conf");
    edit(&path, temp.path(), |_| {});

    let handle = handle(temp.path(), &path, ValidationMode::Static).await;
    edit(&path, temp.path(), |config| config.runtime.ctr_stop_timeout = 120);

    let after = handle.reload().await.unwrap();
    assert_eq!(after.mode(), ValidationMode::Static);
    assert_eq!(after.config().runtime.ctr_stop_timeout, 120);
}

#[tokio::test]
async fn test_invalid_reload_keeps_current_config() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("corral.conf");
    edit(&path, temp.path(), |_| {});

    let handle = handle(temp.path(), &path, ValidationMode::Execution).await;
    let before = handle.current();

    edit(&path, temp.path(), |config| {
        config.runtime.default_runtime = "ghost".to_string();
    });
    assert!(handle.reload().await.is_err());
    assert!(Arc::ptr_eq(&before, &handle.current()));
}

#[tokio::test]
async fn test_reload_picks_up_drop_ins() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("corral.conf");
    edit(&path, temp.path(), |_| {});
    common::write(temp.path(), "corral.conf.d/10-log.conf", "[corral.runtime]\nlog_level = \"warn\"\n");

    let handle = handle(temp.path(), &path, ValidationMode::Execution).await;
    assert_eq!(handle.current().config().runtime.log_level, "warn");

    common::write(temp.path(), "corral.conf.d/10-log.conf", "[corral.runtime]\nlog_level = \"error\"\n");
    let after = handle.reload().await.unwrap();
    assert_eq!(after.config().runtime.log_level, "error");
}
