//! Pod namespace management.
//!
//! Pods share IPC, network, UTS and user namespaces between their
//! containers. Those namespaces are pinned under a managed directory so
//! they outlive the infra process.

mod manager;

use std::fmt;
use std::str::FromStr;

use corral_common::{ConfigError, ConfigResult};

pub use corral_oci::NamespaceType;
pub use manager::NamespaceManager;

/// One user namespace ID mapping range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapping {
    /// Container ID (start of range).
    pub container_id: u32,
    /// Host ID (start of range).
    pub host_id: u32,
    /// Size of the range.
    pub size: u32,
}

impl IdMapping {
    /// Whether the host range starts at or above `minimum`. A negative
    /// minimum disables the check.
    #[must_use]
    pub fn host_range_above(&self, minimum: i64) -> bool {
        minimum < 0 || i64::from(self.host_id) >= minimum
    }
}

impl FromStr for IdMapping {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let [container_id, host_id, size] = parts.as_slice() else {
            return Err(ConfigError::invalid(format!(
                "invalid ID mapping {s:?}, expected containerID:hostID:size"
            )));
        };
        let field = |value: &str| {
            value
                .parse::<u32>()
                .map_err(|e| ConfigError::invalid(format!("invalid ID mapping {s:?}: {e}")))
        };
        let mapping = Self {
            container_id: field(container_id)?,
            host_id: field(host_id)?,
            size: field(size)?,
        };
        if mapping.size == 0 {
            return Err(ConfigError::invalid(format!(
                "invalid ID mapping {s:?}: size must be positive"
            )));
        }
        Ok(mapping)
    }
}

impl fmt::Display for IdMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.container_id, self.host_id, self.size)
    }
}

/// Parse a comma-separated mapping list. An empty string is no mappings.
///
/// # Errors
///
/// Returns the first malformed range.
pub fn parse_id_mappings(list: &str) -> ConfigResult<Vec<IdMapping>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
