//! Namespace kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    /// PID namespace.
    Pid,
    /// Network namespace.
    Network,
    /// Mount namespace.
    Mount,
    /// IPC namespace.
    Ipc,
    /// UTS namespace.
    Uts,
    /// User namespace.
    User,
    /// Cgroup namespace.
    Cgroup,
    /// Time namespace.
    Time,
}

impl NamespaceType {
    /// Namespaces that are pinned to the filesystem so they outlive their
    /// first process.
    pub const PINNABLE: [Self; 4] = [Self::Ipc, Self::Network, Self::Uts, Self::User];

    /// Short kernel name (`/proc/<pid>/ns/<name>`).
    #[must_use]
    pub const fn kernel_name(self) -> &'static str {
        match self {
            Self::Pid => "pid",
            Self::Network => "net",
            Self::Mount => "mnt",
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::User => "user",
            Self::Cgroup => "cgroup",
            Self::Time => "time",
        }
    }
}

impl fmt::Display for NamespaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kernel_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_names_are_oci_names() {
        let json = serde_json::to_string(&NamespaceType::Network).unwrap();
        assert_eq!(json, "\"network\"");
        assert_eq!(NamespaceType::Network.kernel_name(), "net");
    }
}
