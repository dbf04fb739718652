//! OCI runtime features document.
//!
//! Based on the OCI Runtime Specification `features.md`:
//! <https://github.com/opencontainers/runtime-spec/blob/main/features.md>
//!
//! Every field is optional. A runtime that omits a section is treated as
//! not supporting it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Output of `<runtime> features`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    /// Minimum OCI spec version supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oci_version_min: Option<String>,
    /// Maximum OCI spec version supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oci_version_max: Option<String>,
    /// Supported hook names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Vec<String>>,
    /// Supported mount options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_options: Option<Vec<String>>,
    /// Linux-specific features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux: Option<LinuxFeatures>,
    /// Implementation-specific annotations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
    /// Annotations that may change the container's security posture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potentially_unsafe_config_annotations: Option<Vec<String>>,
}

/// Linux section of the features document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxFeatures {
    /// Supported namespace types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Vec<String>>,
    /// Known capability names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    /// Cgroup support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroup: Option<CgroupFeatures>,
    /// Seccomp support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp: Option<SeccompFeatures>,
    /// AppArmor support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apparmor: Option<Toggle>,
    /// SELinux support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selinux: Option<Toggle>,
    /// Intel RDT support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intel_rdt: Option<Toggle>,
    /// Mount extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_extensions: Option<MountExtensions>,
}

/// A feature that is simply on or off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toggle {
    /// Whether the feature is enabled. `None` means unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl Toggle {
    /// True only when the runtime explicitly advertises the feature.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled == Some(true)
    }
}

/// Cgroup support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CgroupFeatures {
    /// Cgroup v1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v1: Option<bool>,
    /// Cgroup v2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v2: Option<bool>,
    /// Systemd cgroup driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systemd: Option<bool>,
    /// Rootless systemd cgroup driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systemd_user: Option<bool>,
    /// RDMA controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rdma: Option<bool>,
}

/// Seccomp support.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeccompFeatures {
    /// Whether seccomp is supported at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Supported actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    /// Supported operators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operators: Option<Vec<String>>,
    /// Supported architectures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archs: Option<Vec<String>>,
    /// Flags recognised by the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_flags: Option<Vec<String>>,
    /// Flags the runtime can actually apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_flags: Option<Vec<String>>,
}

/// Mount extensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountExtensions {
    /// ID-mapped mounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idmap: Option<Toggle>,
}

impl Features {
    /// Parse the output of `<runtime> features`.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when the output is not a features document.
    pub fn from_slice(output: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(output)
    }

    /// Whether the runtime advertises ID-mapped mount support.
    #[must_use]
    pub fn supports_idmap(&self) -> bool {
        self.linux
            .as_ref()
            .and_then(|linux| linux.mount_extensions.as_ref())
            .and_then(|ext| ext.idmap.as_ref())
            .is_some_and(Toggle::is_enabled)
    }
}
