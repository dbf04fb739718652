//! Additional host devices (`src[:dst[:perms]]`).

use std::path::PathBuf;
use std::str::FromStr;

use corral_common::{ConfigError, ConfigResult};

/// A host device added to every container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Path on the host.
    pub source: PathBuf,
    /// Path inside the container.
    pub destination: PathBuf,
    /// cgroup permissions, a subset of `rwm`.
    pub permissions: String,
}

impl FromStr for Device {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| ConfigError::invalid(format!("invalid device {s:?}: {why}"));

        let parts: Vec<&str> = s.split(':').collect();
        let (source, destination, permissions) = match parts.as_slice() {
            [src] => (*src, *src, "rwm"),
            [src, third] if is_permissions(third) => (*src, *src, *third),
            [src, dst] => (*src, *dst, "rwm"),
            [src, dst, perms] => (*src, *dst, *perms),
            _ => return Err(invalid("expected src[:dst[:perms]]")),
        };

        if !source.starts_with('/') || !destination.starts_with('/') {
            return Err(invalid("paths must be absolute"));
        }
        if !is_permissions(permissions) {
            return Err(invalid("permissions must be a subset of rwm"));
        }

        Ok(Self {
            source: PathBuf::from(source),
            destination: PathBuf::from(destination),
            permissions: permissions.to_string(),
        })
    }
}

fn is_permissions(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 3
        && value.chars().all(|c| matches!(c, 'r' | 'w' | 'm'))
        && !value
            .chars()
            .enumerate()
            .any(|(i, c)| value[i + 1..].contains(c))
}

/// Parsed `additional_devices`.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    devices: Vec<Device>,
}

impl DeviceConfig {
    /// Parse every entry of `entries`.
    ///
    /// # Errors
    ///
    /// Returns the first malformed entry.
    pub fn load(entries: &[String]) -> ConfigResult<Self> {
        let devices = entries
            .iter()
            .map(|entry| entry.parse())
            .collect::<ConfigResult<Vec<Device>>>()?;
        Ok(Self { devices })
    }

    /// The parsed devices.
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forms() {
        let device: Device = "/dev/fuse".parse().unwrap();
        assert_eq!(device.destination, PathBuf::from("/dev/fuse"));
        assert_eq!(device.permissions, "rwm");

        let device: Device = "/dev/sdc:r".parse().unwrap();
        assert_eq!(device.destination, PathBuf::from("/dev/sdc"));
        assert_eq!(device.permissions, "r");

        let device: Device = "/dev/sdc:/dev/xvdc:rw".parse().unwrap();
        assert_eq!(device.destination, PathBuf::from("/dev/xvdc"));
        assert_eq!(device.permissions, "rw");
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["dev/fuse", "/dev/a:/dev/b:rx", "/dev/a:/dev/b:rr", "/a:/b:r:w", "/dev/a:b"] {
            assert!(bad.parse::<Device>().is_err(), "{bad:?}");
        }
    }
}
