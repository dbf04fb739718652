//! Monitor process (conmon) capabilities.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use corral_common::{ConfigError, ConfigResult};

use crate::host::HostEnv;

/// Name of the monitor binary searched on `$PATH`.
pub const MONITOR_BINARY: &str = "conmon";

const SYNC_VERSION: MonitorVersion = MonitorVersion::new(2, 0, 19);
const LOG_GLOBAL_SIZE_MAX_VERSION: MonitorVersion = MonitorVersion::new(2, 1, 2);

/// A `major.minor.patch` monitor version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonitorVersion {
    /// Major version.
    pub major: u64,
    /// Minor version.
    pub minor: u64,
    /// Patch version.
    pub patch: u64,
}

impl MonitorVersion {
    /// Build a version.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    /// Find the version in `--version` output (`conmon version 2.1.10`).
    ///
    /// # Errors
    ///
    /// Fails when no line carries a parseable version.
    pub fn parse_output(output: &str) -> ConfigResult<Self> {
        output
            .lines()
            .find_map(|line| {
                let (_, rest) = line.split_once("version")?;
                parse_triplet(rest.trim())
            })
            .ok_or_else(|| {
                ConfigError::invalid(format!(
                    "unable to parse monitor version from {:?}",
                    output.lines().next().unwrap_or_default()
                ))
            })
    }
}

fn parse_triplet(value: &str) -> Option<MonitorVersion> {
    let value = value.trim_start_matches('v');
    let mut parts = value.split(['.', '-', '+']);
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some(MonitorVersion::new(major, minor, patch))
}

impl fmt::Display for MonitorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// What the installed monitor supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorCapabilities {
    /// Detected version.
    pub version: MonitorVersion,
    /// `--sync` is available.
    pub supports_sync: bool,
    /// `--log-global-size-max` is available.
    pub supports_log_global_size_max: bool,
}

impl MonitorCapabilities {
    /// Capabilities implied by `version`.
    #[must_use]
    pub fn from_version(version: MonitorVersion) -> Self {
        Self {
            version,
            supports_sync: version >= SYNC_VERSION,
            supports_log_global_size_max: version >= LOG_GLOBAL_SIZE_MAX_VERSION,
        }
    }

    /// Run `<path> --version` and derive capabilities from its output.
    ///
    /// # Errors
    ///
    /// Fails when the binary cannot be run or its version cannot be parsed.
    pub async fn probe(host: &dyn HostEnv, path: &Path, timeout: Duration) -> ConfigResult<Self> {
        let output = host.run(path, &["--version"], timeout).await?;
        let version = MonitorVersion::parse_output(&String::from_utf8_lossy(&output))?;
        tracing::debug!(path = %path.display(), %version, "Detected monitor version");
        Ok(Self::from_version(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_conmon_output() {
        let version = MonitorVersion::parse_output(
            "conmon version 2.1.10\ncommit: 2dcd736e46ded79a53339462bc251694b150f870\n",
        )
        .unwrap();
        assert_eq!(version, MonitorVersion::new(2, 1, 10));
        assert!(MonitorVersion::parse_output("hello\n").is_err());
    }

    #[test]
    fn capability_thresholds() {
        let old = MonitorCapabilities::from_version(MonitorVersion::new(2, 0, 18));
        assert!(!old.supports_sync && !old.supports_log_global_size_max);

        let mid = MonitorCapabilities::from_version(MonitorVersion::new(2, 0, 19));
        assert!(mid.supports_sync && !mid.supports_log_global_size_max);

        let new = MonitorCapabilities::from_version(MonitorVersion::new(2, 1, 2));
        assert!(new.supports_sync && new.supports_log_global_size_max);
    }
}
