//! Workload profiles selected by pod annotation.

use std::collections::BTreeMap;

use corral_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

use crate::annotations;
use crate::cpuset::CpuSet;

/// Resource defaults applied to containers of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadResources {
    /// CPU shares.
    pub cpushares: u64,
    /// CFS quota in microseconds.
    pub cpuquota: i64,
    /// CFS period in microseconds.
    pub cpuperiod: u64,
    /// CPU list (`0-3,5`).
    pub cpuset: String,
}

/// One `[corral.runtime.workloads.<name>]` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Pod annotation key that opts a pod into this workload.
    pub activation_annotation: String,
    /// Prefix of per-container override annotations.
    pub annotation_prefix: String,
    /// Annotations containers of this workload may use.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_annotations: Vec<String>,
    /// Resource defaults.
    pub resources: WorkloadResources,
}

impl WorkloadConfig {
    /// Check a single workload.
    ///
    /// # Errors
    ///
    /// Fails without an activation annotation, for unknown annotations and
    /// for a malformed CPU set.
    pub fn validate(&self, name: &str) -> ConfigResult<()> {
        if self.activation_annotation.is_empty() {
            return Err(ConfigError::invalid(format!(
                "workload {name:?}: activation_annotation is required"
            )));
        }
        if let Some(unknown) = self
            .allowed_annotations
            .iter()
            .find(|a| !annotations::is_recognized(a))
        {
            return Err(ConfigError::invalid(format!(
                "workload {name:?}: invalid allowed_annotation: {unknown}"
            )));
        }
        if !self.resources.cpuset.is_empty() {
            self.resources
                .cpuset
                .parse::<CpuSet>()
                .map_err(|e| ConfigError::invalid(format!("workload {name:?}: {e}")))?;
        }
        Ok(())
    }

    /// Whether `pod_annotations` activate this workload.
    pub fn is_activated<'a>(&self, mut pod_annotations: impl Iterator<Item = &'a str>) -> bool {
        pod_annotations.any(|key| key == self.activation_annotation)
    }
}

/// Workloads keyed by name.
pub type Workloads = BTreeMap<String, WorkloadConfig>;

/// Check every workload.
///
/// # Errors
///
/// Returns the first invalid workload.
pub fn validate_workloads(workloads: &Workloads) -> ConfigResult<()> {
    for (name, workload) in workloads {
        workload.validate(name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload() -> WorkloadConfig {
        WorkloadConfig {
            activation_annotation: "io.example/management".to_string(),
            annotation_prefix: "io.example.management".to_string(),
            allowed_annotations: vec![annotations::CPU_SHARED.to_string()],
            resources: WorkloadResources {
                cpushares: 2,
                cpuset: "0-1".to_string(),
                ..WorkloadResources::default()
            },
        }
    }

    #[test]
    fn valid_workload() {
        workload().validate("management").unwrap();
        assert!(workload().is_activated(["a", "io.example/management"].into_iter()));
    }

    #[test]
    fn activation_annotation_required() {
        let mut w = workload();
        w.activation_annotation.clear();
        assert!(w.validate("m").is_err());
    }

    #[test]
    fn unknown_annotation_and_bad_cpuset() {
        let mut w = workload();
        w.allowed_annotations.push("io.example/other".to_string());
        assert!(w.validate("m").is_err());

        let mut w = workload();
        w.resources.cpuset = "2-1".to_string();
        assert!(validate_workloads(&Workloads::from([("m".to_string(), w)])).is_err());
    }
}
