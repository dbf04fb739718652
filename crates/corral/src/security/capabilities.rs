//! Default Linux capabilities granted to containers.

use std::str::FromStr;

use corral_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// Capability names added to every container.
///
/// Names are accepted with or without the `CAP_` prefix and in any case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(Vec<String>);

impl Capabilities {
    /// Wrap a list of capability names.
    #[must_use]
    pub const fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    /// The configured names, as written.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// Check that every name is a capability the kernel interface knows.
    ///
    /// # Errors
    ///
    /// Returns the first unknown name.
    pub fn validate(&self) -> ConfigResult<()> {
        self.to_caps().map(|_| ())
    }

    /// Convert to a `caps` set.
    ///
    /// # Errors
    ///
    /// Returns the first unknown name.
    pub fn to_caps(&self) -> ConfigResult<caps::CapsHashSet> {
        self.0
            .iter()
            .map(|name| {
                caps::Capability::from_str(&normalize(name))
                    .map_err(|_| ConfigError::invalid(format!("unknown capability {name:?}")))
            })
            .collect()
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self(
            [
                "CHOWN",
                "DAC_OVERRIDE",
                "FSETID",
                "FOWNER",
                "SETGID",
                "SETUID",
                "SETPCAP",
                "NET_BIND_SERVICE",
                "KILL",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        )
    }
}

/// Canonical `CAP_*` spelling of a capability name.
fn normalize(name: &str) -> String {
    let upper = name.trim().to_ascii_uppercase();
    if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{upper}")
    }
}
