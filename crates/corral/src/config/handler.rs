//! Runtime handlers: the OCI runtimes pods can be routed to.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use corral_common::{ConfigError, ConfigResult};
use corral_oci::Features;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{ValidationMode, is_empty_path};
use crate::annotations;
use crate::host::HostEnv;

/// Name of the handler added when no default runtime is configured.
pub const DEFAULT_RUNTIME: &str = "runc";

/// State root of the built-in handler.
pub const DEFAULT_RUNTIME_ROOT: &str = "/run/runc";

/// Cgroup the monitor runs in when nothing else is configured.
pub const DEFAULT_MONITOR_CGROUP: &str = "system.slice";

/// Environment of the monitor process of the built-in handler.
pub const DEFAULT_MONITOR_ENV: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Exec processes join the monitor's cgroup.
pub const MONITOR_EXEC_CGROUP_DEFAULT: &str = "";

/// Exec processes join the container's cgroup.
pub const MONITOR_EXEC_CGROUP_CONTAINER: &str = "container";

/// Executable name pattern of VM runtime shims.
pub const VM_BINARY_PATTERN: &str = r"containerd-shim-([a-zA-Z0-9\-\+])+-v2";

static VM_BINARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(VM_BINARY_PATTERN).expect("valid VM shim pattern"));

/// Kind of runtime behind a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeType {
    /// A plain OCI runtime driven through the monitor.
    Oci,
    /// A VM runtime reached through a containerd shim.
    Vm,
    /// A runtime that manages whole pods.
    Pod,
}

impl RuntimeType {
    /// Parse a configured type. An empty value is [`RuntimeType::Oci`].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "" | "oci" => Some(Self::Oci),
            "vm" => Some(Self::Vm),
            "pod" => Some(Self::Pod),
            _ => None,
        }
    }

    /// Configuration spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Oci => "oci",
            Self::Vm => "vm",
            Self::Pod => "pod",
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `[corral.runtime.runtimes.<name>]` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeHandler {
    /// Runtime executable. Empty means "look up the handler name on `$PATH`".
    pub runtime_path: PathBuf,
    /// Runtime configuration file, VM runtimes only.
    pub runtime_config_path: PathBuf,
    /// `oci`, `vm` or `pod`. Empty means `oci`.
    pub runtime_type: String,
    /// Runtime state root.
    pub runtime_root: PathBuf,
    /// Do not pass host devices to privileged containers.
    #[serde(skip_serializing_if = "is_false")]
    pub privileged_without_host_devices: bool,
    /// Annotations this handler may process.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_annotations: Vec<String>,
    /// Monitor executable.
    #[serde(skip_serializing_if = "is_empty_path")]
    pub monitor_path: PathBuf,
    /// Cgroup the monitor is placed in.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub monitor_cgroup: String,
    /// Monitor environment (`KEY=value`).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub monitor_env: Vec<String>,
    /// Where exec processes are placed: `""` or `"container"`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub monitor_exec_cgroup: String,
    /// Runtime executable per platform (`os/arch`).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub platform_runtime_paths: BTreeMap<String, PathBuf>,
    /// The runtime pulls images itself.
    #[serde(skip_serializing_if = "is_false")]
    pub runtime_pull_image: bool,

    #[serde(skip)]
    disallowed_annotations: Vec<String>,
    #[serde(skip)]
    features: Option<Features>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

impl RuntimeHandler {
    /// The handler used when no default runtime is configured.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            runtime_type: RuntimeType::Oci.as_str().to_string(),
            runtime_root: PathBuf::from(DEFAULT_RUNTIME_ROOT),
            allowed_annotations: vec![
                annotations::OCI_SECCOMP_BPF_HOOK.to_string(),
                annotations::DEVICES.to_string(),
            ],
            monitor_env: vec![DEFAULT_MONITOR_ENV.to_string()],
            monitor_cgroup: DEFAULT_MONITOR_CGROUP.to_string(),
            ..Self::default()
        }
    }

    /// The parsed runtime type, `None` when the configured value is unknown.
    #[must_use]
    pub fn kind(&self) -> Option<RuntimeType> {
        RuntimeType::parse(&self.runtime_type)
    }

    /// Whether this handler is driven through the monitor.
    #[must_use]
    pub fn is_oci(&self) -> bool {
        self.kind() == Some(RuntimeType::Oci)
    }

    /// Run every check for this handler.
    ///
    /// Static mode skips the checks that need the filesystem or `$PATH`.
    ///
    /// # Errors
    ///
    /// Returns the first failed check.
    pub fn validate(&mut self, name: &str, mode: ValidationMode, host: &dyn HostEnv) -> ConfigResult<()> {
        if mode.is_execution() {
            self.validate_runtime_path(name, host)?;
        }
        self.validate_runtime_config_path(name, mode)?;
        self.validate_allowed_annotations(name)?;
        self.validate_runtime_type(name)?;
        self.validate_monitor_exec_cgroup(name)
    }

    /// Resolve the runtime executable and check VM shim naming.
    ///
    /// # Errors
    ///
    /// Fails when the binary cannot be found or a VM runtime does not follow
    /// the shim naming pattern.
    pub fn validate_runtime_path(&mut self, name: &str, host: &dyn HostEnv) -> ConfigResult<()> {
        if is_empty_path(&self.runtime_path) {
            self.runtime_path = host.look_path(name).ok_or_else(|| {
                ConfigError::handler(name, format!("{name:?} not found in $PATH"))
            })?;
            tracing::debug!(runtime = name, path = %self.runtime_path.display(), "Using runtime executable from $PATH");
        } else if let Err(e) = std::fs::metadata(&self.runtime_path) {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(ConfigError::handler(
                    name,
                    format!("invalid runtime_path {}: {e}", self.runtime_path.display()),
                ));
            }
        }

        if !self.matches_vm_binary_pattern() {
            return Err(ConfigError::handler(
                name,
                "invalid runtime_path: containerd binary naming pattern is not followed",
            ));
        }

        tracing::debug!(runtime = name, path = %self.runtime_path.display(), "Found valid runtime");
        Ok(())
    }

    /// Whether the executable name fits a VM runtime. Always true for other
    /// runtime types.
    #[must_use]
    pub fn matches_vm_binary_pattern(&self) -> bool {
        if self.kind() != Some(RuntimeType::Vm) {
            return true;
        }
        self.runtime_path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| VM_BINARY.is_match(name))
    }

    /// Check the runtime type.
    ///
    /// # Errors
    ///
    /// Fails for values other than `oci`, `vm`, `pod` or empty.
    pub fn validate_runtime_type(&self, name: &str) -> ConfigResult<()> {
        if self.kind().is_none() {
            return Err(ConfigError::handler(
                name,
                format!("invalid runtime_type {:?}", self.runtime_type),
            ));
        }
        Ok(())
    }

    /// Check `runtime_config_path`: only VM runtimes take one, and in
    /// execution mode it must exist.
    ///
    /// # Errors
    ///
    /// Fails when set on a non-VM runtime or missing on disk.
    pub fn validate_runtime_config_path(&self, name: &str, mode: ValidationMode) -> ConfigResult<()> {
        if is_empty_path(&self.runtime_config_path) {
            return Ok(());
        }
        if self.kind() != Some(RuntimeType::Vm) {
            return Err(ConfigError::handler(
                name,
                "runtime_config_path can only be used with the 'vm' runtime type",
            ));
        }
        if !mode.is_execution() {
            return Ok(());
        }
        match std::fs::metadata(&self.runtime_config_path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::handler(
                name,
                format!(
                    "invalid runtime_config_path {}: {e}",
                    self.runtime_config_path.display()
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Check `allowed_annotations` and compute the disallowed complement.
    ///
    /// # Errors
    ///
    /// Fails for annotations outside the recognised set.
    pub fn validate_allowed_annotations(&mut self, name: &str) -> ConfigResult<()> {
        let disallowed =
            annotations::disallowed_for(self.allowed_annotations.iter().map(String::as_str))
                .map_err(|unknown| {
                    ConfigError::handler(name, format!("invalid allowed_annotation: {unknown}"))
                })?;
        tracing::debug!(runtime = name, allowed = ?self.allowed_annotations, "Allowed annotations for runtime");
        self.disallowed_annotations = disallowed;
        Ok(())
    }

    /// Check `monitor_exec_cgroup`.
    ///
    /// # Errors
    ///
    /// Fails for values other than `""` and `"container"`.
    pub fn validate_monitor_exec_cgroup(&self, name: &str) -> ConfigResult<()> {
        match self.monitor_exec_cgroup.as_str() {
            MONITOR_EXEC_CGROUP_DEFAULT | MONITOR_EXEC_CGROUP_CONTAINER => Ok(()),
            other => Err(ConfigError::handler(
                name,
                format!(
                    "invalid monitor_exec_cgroup {other:?}, expected {MONITOR_EXEC_CGROUP_DEFAULT:?} or {MONITOR_EXEC_CGROUP_CONTAINER:?}"
                ),
            )),
        }
    }

    /// Recognised annotations this handler strips from requests, sorted.
    #[must_use]
    pub fn disallowed_annotations(&self) -> &[String] {
        &self.disallowed_annotations
    }

    /// Features reported by the runtime, if it was probed successfully.
    #[must_use]
    pub const fn features(&self) -> Option<&Features> {
        self.features.as_ref()
    }

    /// Replace the probed features.
    pub fn set_features(&mut self, features: Option<Features>) {
        self.features = features;
    }

    /// Whether the runtime advertises idmapped mounts.
    #[must_use]
    pub fn supports_idmap(&self) -> bool {
        self.features.as_ref().is_some_and(Features::supports_idmap)
    }

    /// Runtime executable for `platform`, falling back to `runtime_path`.
    #[must_use]
    pub fn runtime_path_for(&self, platform: &str) -> &Path {
        self.platform_runtime_paths
            .get(platform)
            .map_or(&self.runtime_path, |path| path)
    }
}

/// Ask a runtime for its features document.
///
/// # Errors
///
/// Fails when the runtime cannot be run, exceeds `timeout`, or prints
/// something that is not a features document.
pub async fn probe_features(
    host: &dyn HostEnv,
    runtime_path: &Path,
    timeout: Duration,
) -> ConfigResult<Features> {
    let output = tokio::time::timeout(timeout, host.run(runtime_path, &["features"], timeout))
        .await
        .map_err(|_| ConfigError::CommandTimeout {
            program: runtime_path.display().to_string(),
            seconds: timeout.as_secs(),
        })??;
    Features::from_slice(&output).map_err(|e| ConfigError::Command {
        program: runtime_path.display().to_string(),
        message: format!("unmarshalling OCI features: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_handler(path: &str) -> RuntimeHandler {
        RuntimeHandler {
            runtime_type: "vm".to_string(),
            runtime_path: PathBuf::from(path),
            ..RuntimeHandler::default()
        }
    }

    #[test]
    fn runtime_types() {
        assert_eq!(RuntimeType::parse(""), Some(RuntimeType::Oci));
        assert_eq!(RuntimeType::parse("oci"), Some(RuntimeType::Oci));
        assert_eq!(RuntimeType::parse("vm"), Some(RuntimeType::Vm));
        assert_eq!(RuntimeType::parse("pod"), Some(RuntimeType::Pod));
        assert_eq!(RuntimeType::parse("OCI"), None);

        let handler = RuntimeHandler {
            runtime_type: "wasm".to_string(),
            ..RuntimeHandler::default()
        };
        assert!(handler.validate_runtime_type("w").is_err());
    }

    #[test]
    fn vm_binary_pattern() {
        assert!(vm_handler("/usr/bin/containerd-shim-kata-v2").matches_vm_binary_pattern());
        assert!(vm_handler("/opt/containerd-shim-runsc+gvisor-v2").matches_vm_binary_pattern());
        assert!(!vm_handler("/usr/bin/kata-runtime").matches_vm_binary_pattern());
        assert!(RuntimeHandler::default().matches_vm_binary_pattern());
    }

    #[test]
    fn config_path_only_for_vm() {
        let mut handler = RuntimeHandler {
            runtime_config_path: PathBuf::from("/etc/kata/configuration.toml"),
            ..RuntimeHandler::default()
        };
        assert!(handler.validate_runtime_config_path("r", ValidationMode::Static).is_err());

        handler.runtime_type = "vm".to_string();
        assert!(handler.validate_runtime_config_path("r", ValidationMode::Static).is_ok());
        assert!(handler.validate_runtime_config_path("r", ValidationMode::Execution).is_err());
    }

    #[test]
    fn annotations_complement() {
        let mut handler = RuntimeHandler::builtin();
        handler.validate_allowed_annotations("runc").unwrap();
        let disallowed = handler.disallowed_annotations();
        assert_eq!(disallowed.len(), annotations::ALL_ALLOWED_ANNOTATIONS.len() - 2);
        assert!(!disallowed.iter().any(|a| a == annotations::DEVICES));

        handler.allowed_annotations.push("io.example/bogus".to_string());
        let err = handler.validate_allowed_annotations("runc").unwrap_err();
        assert!(err.to_string().contains("io.example/bogus"));
    }

    #[test]
    fn monitor_exec_cgroup_values() {
        let mut handler = RuntimeHandler::default();
        assert!(handler.validate_monitor_exec_cgroup("r").is_ok());
        handler.monitor_exec_cgroup = "container".to_string();
        assert!(handler.validate_monitor_exec_cgroup("r").is_ok());
        handler.monitor_exec_cgroup = "pod".to_string();
        assert!(handler.validate_monitor_exec_cgroup("r").is_err());
    }

    #[test]
    fn idmap_support_needs_features() {
        let mut handler = RuntimeHandler::builtin();
        assert!(!handler.supports_idmap());

        let features = Features::from_slice(
            br#"{"linux": {"mountExtensions": {"idmap": {"enabled": true}}}}"#,
        )
        .unwrap();
        handler.set_features(Some(features));
        assert!(handler.supports_idmap());
    }

    #[test]
    fn derived_fields_are_not_serialized() {
        let mut handler = RuntimeHandler::builtin();
        handler.validate_allowed_annotations("runc").unwrap();
        let encoded = toml::to_string(&handler).unwrap();
        assert!(!encoded.contains("disallowed"));
        assert!(!encoded.contains("features"));
        assert!(!encoded.contains("runtime_pull_image"));
    }

    #[test]
    fn platform_paths() {
        let mut handler = RuntimeHandler::builtin();
        handler.runtime_path = PathBuf::from("/usr/bin/runc");
        handler
            .platform_runtime_paths
            .insert("linux/arm64".to_string(), PathBuf::from("/usr/bin/runc-arm64"));
        assert_eq!(handler.runtime_path_for("linux/arm64"), Path::new("/usr/bin/runc-arm64"));
        assert_eq!(handler.runtime_path_for("linux/amd64"), Path::new("/usr/bin/runc"));
    }
}
