//! Shared fixtures for corral integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use corral::config::Config;
use corral::host::HostEnv;
use corral::storage::{StorageBackend, StoreOptions};
use corral_common::{ConfigError, ConfigResult};

pub const RUNC_FEATURES: &str = r#"{
    "ociVersionMin": "1.0.0",
    "ociVersionMax": "1.1.0",
    "linux": {
        "namespaces": ["cgroup", "ipc", "mount", "network", "pid", "user", "uts"],
        "mountExtensions": {"idmap": {"enabled": true}}
    }
}"#;

/// A host whose binaries live in a temporary `bin` directory.
#[derive(Debug)]
pub struct FakeHost {
    bin_dir: PathBuf,
    binaries: HashSet<String>,
    systemd: bool,
    selinux: bool,
    pub selinux_disabled: AtomicBool,
    pub runs: AtomicUsize,
}

impl FakeHost {
    /// A host providing `binaries` under `dir/bin`.
    pub fn new(dir: &Path, binaries: &[&str]) -> Self {
        let bin_dir = dir.join("bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        for name in binaries {
            std::fs::write(bin_dir.join(name), "#!/bin/sh\n").unwrap();
        }
        Self {
            bin_dir,
            binaries: binaries.iter().map(ToString::to_string).collect(),
            systemd: false,
            selinux: false,
            selinux_disabled: AtomicBool::new(false),
            runs: AtomicUsize::new(0),
        }
    }

    /// Everything a full execution-mode resolution needs.
    pub fn complete(dir: &Path) -> Self {
        Self::new(dir, &["runc", "crun", "conmon", "pinns", "taskset"])
    }

    pub fn with_systemd(mut self) -> Self {
        self.systemd = true;
        self
    }

    pub fn with_selinux(mut self) -> Self {
        self.selinux = true;
        self
    }
}

#[async_trait]
impl HostEnv for FakeHost {
    fn look_path(&self, name: &str) -> Option<PathBuf> {
        self.binaries.contains(name).then(|| self.bin_dir.join(name))
    }

    fn check_node(&self) -> ConfigResult<()> {
        Ok(())
    }

    fn systemd_running(&self) -> bool {
        self.systemd
    }

    fn cgroup_v2(&self) -> bool {
        true
    }

    fn selinux_enabled(&self) -> bool {
        self.selinux && !self.selinux_disabled.load(Ordering::SeqCst)
    }

    fn disable_selinux(&self) {
        self.selinux_disabled.store(true, Ordering::SeqCst);
    }

    fn apparmor_enabled(&self) -> bool {
        false
    }

    fn timezone_exists(&self, name: &str) -> bool {
        matches!(name, "UTC" | "Europe/Berlin")
    }

    async fn run(&self, program: &Path, args: &[&str], _timeout: Duration) -> ConfigResult<Vec<u8>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let name = program
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        match (name, args) {
            ("conmon", ["--version"]) => Ok(b"conmon version 2.1.10\ncommit: 0123abc\n".to_vec()),
            ("runc", ["features"]) => Ok(RUNC_FEATURES.as_bytes().to_vec()),
            _ => Err(ConfigError::Command {
                program: program.display().to_string(),
                message: "unknown command".to_string(),
            }),
        }
    }
}

/// Storage that creates its directories and reports what it was given.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    pub defaults: StoreOptions,
}

impl StorageBackend for MemoryStorage {
    fn defaults(&self) -> ConfigResult<StoreOptions> {
        Ok(self.defaults.clone())
    }

    fn open(&self, options: &StoreOptions) -> ConfigResult<StoreOptions> {
        let mut opened = options.clone();
        if opened.driver.is_empty() {
            opened.driver = "vfs".to_string();
        }
        std::fs::create_dir_all(&opened.graph_root)?;
        std::fs::create_dir_all(&opened.run_root)?;
        Ok(opened)
    }
}

/// Defaults with every host path moved under `dir`.
pub fn sandboxed_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.root.root = dir.join("storage");
    config.root.runroot = dir.join("run/storage");
    config.root.log_dir = dir.join("log");
    config.api.listen = dir.join("run/corral.sock");
    config.image.signature_policy_dir = dir.join("policies");
    config.network.network_dir = dir.join("net.d");
    config.network.plugin_dirs = vec![dir.join("cni/bin")];
    config.nri.nri_listen = dir.join("run/nri/nri.sock");
    config.nri.nri_plugin_dir = dir.join("nri/plugins");
    config.nri.nri_plugin_config_dir = dir.join("nri/conf.d");
    config.runtime.hooks_dir = vec![dir.join("hooks.d")];
    config.runtime.namespaces_dir = dir.join("ns");
    config.runtime.cgroup_manager = "cgroupfs".to_string();
    config.runtime.conmon_cgroup = "pod".to_string();
    config
}

/// Write `content` to `dir/name`, creating parents.
pub fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}
