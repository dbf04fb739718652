//! Integration tests for static and execution-mode resolution.

mod common;

use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use corral::cgroup::CgroupManager;
use corral::config::{Config, RuntimeHandler, ValidationMode, resolve};
use corral_common::ConfigError;
use tempfile::tempdir;

use common::{FakeHost, MemoryStorage, sandboxed_config};

#[tokio::test]
async fn test_static_resolution_falls_back_to_runc() {
    let temp = tempdir().unwrap();
    let mut config = Config::default();
    config.runtime.default_runtime = String::new();
    config.runtime.runtimes.clear();

    let resolved = resolve(
        config,
        ValidationMode::Static,
        &FakeHost::new(temp.path(), &[]),
        &MemoryStorage::default(),
    )
    .await
    .unwrap();
    assert_eq!(resolved.config().runtime.default_runtime, "runc");
    let runc = resolved.default_handler().unwrap();
    assert_eq!(runc.runtime_root, RuntimeHandler::builtin().runtime_root);
    assert!(runc.is_oci());
}

#[tokio::test]
async fn test_missing_default_runtime_is_fatal() {
    let temp = tempdir().unwrap();
    let mut config = Config::default();
    config.runtime.default_runtime = "ghost".to_string();

    let err = resolve(
        config,
        ValidationMode::Static,
        &FakeHost::new(temp.path(), &[]),
        &MemoryStorage::default(),
    )
    .await
    .unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("validating runtime config"), "{message}");
    assert!(message.contains("[corral.runtime.runtimes.ghost]"), "{message}");
}

#[tokio::test]
async fn test_static_floors() {
    let temp = tempdir().unwrap();
    let host = FakeHost::new(temp.path(), &[]);
    let storage = MemoryStorage::default();

    let mut config = Config::default();
    config.runtime.ctr_stop_timeout = 10;
    let resolved = resolve(config, ValidationMode::Static, &host, &storage).await.unwrap();
    assert_eq!(resolved.config().runtime.ctr_stop_timeout, 30);

    for (size, ok) in [(100, false), (-1, true), (9000, true)] {
        let mut config = Config::default();
        config.runtime.log_size_max = size;
        let result = resolve(config, ValidationMode::Static, &host, &storage).await;
        assert_eq!(result.is_ok(), ok, "log_size_max = {size}");
    }
}

#[tokio::test]
async fn test_static_resolution_does_not_touch_the_host() {
    let temp = tempdir().unwrap();
    let host = FakeHost::new(temp.path(), &[]);
    let config = sandboxed_config(temp.path());

    let resolved = resolve(config, ValidationMode::Static, &host, &MemoryStorage::default())
        .await
        .unwrap();
    assert_eq!(host.runs.load(Ordering::SeqCst), 0);
    assert!(!host.selinux_disabled.load(Ordering::SeqCst));
    assert!(!temp.path().join("log").exists());
    assert!(!temp.path().join("policies").exists());
    assert!(resolved.subsystems().namespace_manager().is_none());
}

#[test_log::test(tokio::test)]
async fn test_execution_resolution() {
    let temp = tempdir().unwrap();
    let host = FakeHost::complete(temp.path());
    let mut config = sandboxed_config(temp.path());
    config.runtime.infra_ctr_cpuset = "0-1".to_string();

    let resolved = resolve(config, ValidationMode::Execution, &host, &MemoryStorage::default())
        .await
        .unwrap();
    let runtime = &resolved.config().runtime;
    let runc = resolved.default_handler().unwrap();

    assert_eq!(runc.runtime_path, temp.path().join("bin/runc"));
    assert_eq!(runc.monitor_path, temp.path().join("bin/conmon"));
    assert_eq!(runc.monitor_cgroup, "pod");
    assert!(runc.supports_idmap());
    assert_eq!(runtime.pinns_path, temp.path().join("bin/pinns"));
    assert_eq!(runtime.hooks_dir, [temp.path().join("hooks.d")]);

    let subsystems = resolved.subsystems();
    let monitor = subsystems.monitor("runc").unwrap();
    assert!(monitor.supports_sync);
    assert_eq!(subsystems.cgroup_manager().unwrap().name(), "cgroupfs");
    assert!(subsystems.namespace_manager().is_some());
    assert!(subsystems.cni().is_some());
    assert_eq!(
        subsystems.command_prefix(),
        [temp.path().join("bin/taskset").display().to_string(), "--cpu-list".to_string(), "0-1".to_string()]
    );
    assert_eq!(subsystems.seccomp().notifier_path(), Some(temp.path().join("run/seccomp").as_path()));

    assert_eq!(resolved.config().root.storage_driver, "vfs");
    for dir in ["log", "policies", "net.d", "cni/bin", "hooks.d", "nri/plugins"] {
        assert!(temp.path().join(dir).is_dir(), "{dir}");
    }
    assert!(host.selinux_disabled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_broken_extra_handler_is_dropped() {
    let temp = tempdir().unwrap();
    let host = FakeHost::complete(temp.path());
    let mut config = sandboxed_config(temp.path());
    let mut kata = RuntimeHandler::default();
    kata.runtime_path = PathBuf::from("/nonexistent/containerd-shim-kata-v2");
    kata.runtime_type = "vm".to_string();
    config.runtime.runtimes.insert("kata".to_string(), kata);
    let mut crun = RuntimeHandler::default();
    crun.runtime_type = "oci".to_string();
    config.runtime.runtimes.insert("crun".to_string(), crun);

    let resolved = resolve(config, ValidationMode::Execution, &host, &MemoryStorage::default())
        .await
        .unwrap();
    assert!(resolved.handler("kata").is_none());

    // crun resolves but its features probe fails; it stays without features.
    let crun = resolved.handler("crun").unwrap();
    assert_eq!(crun.runtime_path, temp.path().join("bin/crun"));
    assert!(crun.features().is_none());
    assert_eq!(crun.monitor_cgroup, "pod");
}

#[tokio::test]
async fn test_monitor_cgroup_must_fit_cgroup_manager() {
    let temp = tempdir().unwrap();

    // The default monitor cgroup is a slice, which systemd accepts.
    let host = FakeHost::complete(temp.path()).with_systemd();
    let mut config = sandboxed_config(temp.path());
    config.runtime.cgroup_manager = "systemd".to_string();
    config.runtime.conmon_cgroup = String::new();
    let resolved = resolve(config, ValidationMode::Execution, &host, &MemoryStorage::default())
        .await
        .unwrap();
    assert_eq!(resolved.default_handler().unwrap().monitor_cgroup, "system.slice");

    // cgroupfs does not.
    let host = FakeHost::complete(temp.path());
    let mut config = sandboxed_config(temp.path());
    config.runtime.conmon_cgroup = String::new();
    let err = resolve(config, ValidationMode::Execution, &host, &MemoryStorage::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("monitor cgroup"), "{err}");
}

#[tokio::test]
async fn test_missing_runtime_binary_fails_default_handler() {
    let temp = tempdir().unwrap();
    let host = FakeHost::new(temp.path(), &["conmon", "pinns"]);
    let config = sandboxed_config(temp.path());

    let err = resolve(config, ValidationMode::Execution, &host, &MemoryStorage::default())
        .await
        .unwrap_err();
    match err {
        ConfigError::Domain { domain, source } => {
            assert_eq!(domain, "runtime");
            assert!(matches!(*source, ConfigError::Handler { ref name, .. } if name == "runc"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_criu_requires_binary() {
    let temp = tempdir().unwrap();
    let host = FakeHost::complete(temp.path());
    let mut config = sandboxed_config(temp.path());
    config.runtime.enable_criu_support = true;

    let err = resolve(config, ValidationMode::Execution, &host, &MemoryStorage::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("without the criu binary"), "{err}");
}

#[tokio::test]
async fn test_missing_seccomp_profile_falls_back_to_builtin() {
    let temp = tempdir().unwrap();
    let host = FakeHost::complete(temp.path());
    let mut config = sandboxed_config(temp.path());
    config.runtime.seccomp_profile = temp.path().join("missing.json");

    let resolved = resolve(config, ValidationMode::Execution, &host, &MemoryStorage::default())
        .await
        .unwrap();
    assert!(resolved.subsystems().seccomp().profile().rule_count() > 0);
}

#[tokio::test]
async fn test_live_socket_blocks_execution() {
    let temp = tempdir().unwrap();
    let host = FakeHost::complete(temp.path());
    let config = sandboxed_config(temp.path());

    std::fs::create_dir_all(temp.path().join("run")).unwrap();
    let _listener = UnixListener::bind(temp.path().join("run/corral.sock")).unwrap();

    let err = resolve(config, ValidationMode::Execution, &host, &MemoryStorage::default())
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("validating api config: already existing connection"), "{err}");
}

#[tokio::test]
async fn test_stale_socket_is_removed() {
    let temp = tempdir().unwrap();
    let host = FakeHost::complete(temp.path());
    let config = sandboxed_config(temp.path());

    let socket = temp.path().join("run/corral.sock");
    std::fs::create_dir_all(temp.path().join("run")).unwrap();
    drop(UnixListener::bind(&socket).unwrap());
    assert!(socket.exists());

    resolve(config, ValidationMode::Execution, &host, &MemoryStorage::default())
        .await
        .unwrap();
    assert!(!socket.exists());
}
