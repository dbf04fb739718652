//! Default container ulimits (`name=soft:hard`).

use std::fmt;
use std::str::FromStr;

use corral_common::{ConfigError, ConfigResult};

/// Resource limit names and their `RLIMIT_*` counterparts.
const RLIMITS: [(&str, &str); 16] = [
    ("as", "RLIMIT_AS"),
    ("core", "RLIMIT_CORE"),
    ("cpu", "RLIMIT_CPU"),
    ("data", "RLIMIT_DATA"),
    ("fsize", "RLIMIT_FSIZE"),
    ("locks", "RLIMIT_LOCKS"),
    ("memlock", "RLIMIT_MEMLOCK"),
    ("msgqueue", "RLIMIT_MSGQUEUE"),
    ("nice", "RLIMIT_NICE"),
    ("nofile", "RLIMIT_NOFILE"),
    ("nproc", "RLIMIT_NPROC"),
    ("rss", "RLIMIT_RSS"),
    ("rtprio", "RLIMIT_RTPRIO"),
    ("rttime", "RLIMIT_RTTIME"),
    ("sigpending", "RLIMIT_SIGPENDING"),
    ("stack", "RLIMIT_STACK"),
];

/// One resource limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ulimit {
    /// Short name (`nofile`).
    pub name: String,
    /// Soft limit, `-1` for unlimited.
    pub soft: i64,
    /// Hard limit, `-1` for unlimited.
    pub hard: i64,
}

impl Ulimit {
    /// The `RLIMIT_*` name used in OCI process specs.
    #[must_use]
    pub fn rlimit_type(&self) -> &'static str {
        RLIMITS
            .iter()
            .find(|(name, _)| *name == self.name)
            .map_or("", |(_, rlimit)| rlimit)
    }
}

impl FromStr for Ulimit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| ConfigError::invalid(format!("invalid ulimit {s:?}: {why}"));

        let (name, limits) = s.split_once('=').ok_or_else(|| invalid("expected name=soft:hard"))?;
        let name = name.trim().to_ascii_lowercase();
        if !RLIMITS.iter().any(|(known, _)| *known == name) {
            return Err(invalid("unknown resource"));
        }

        let parse = |value: &str| {
            value
                .trim()
                .parse::<i64>()
                .map_err(|_| invalid("limits must be integers"))
        };
        let (soft, hard) = match limits.split_once(':') {
            Some((soft, hard)) => (parse(soft)?, parse(hard)?),
            None => {
                let value = parse(limits)?;
                (value, value)
            }
        };

        // -1 is unlimited and compares above everything.
        let unlimited = |v: i64| if v < 0 { i64::MAX } else { v };
        if soft < -1 || hard < -1 {
            return Err(invalid("limits must be -1 or non-negative"));
        }
        if unlimited(soft) > unlimited(hard) {
            return Err(invalid("soft limit exceeds hard limit"));
        }

        Ok(Self { name, soft, hard })
    }
}

impl fmt::Display for Ulimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.name, self.soft, self.hard)
    }
}

/// Parsed `default_ulimits`.
#[derive(Debug, Clone, Default)]
pub struct UlimitsConfig {
    ulimits: Vec<Ulimit>,
}

impl UlimitsConfig {
    /// Parse every entry of `entries`.
    ///
    /// # Errors
    ///
    /// Returns the first malformed entry.
    pub fn load(entries: &[String]) -> ConfigResult<Self> {
        let ulimits = entries
            .iter()
            .map(|entry| entry.parse())
            .collect::<ConfigResult<Vec<Ulimit>>>()?;
        Ok(Self { ulimits })
    }

    /// The parsed limits.
    #[must_use]
    pub fn ulimits(&self) -> &[Ulimit] {
        &self.ulimits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_soft_and_hard() {
        let ulimit: Ulimit = "nofile=1024:2048".parse().unwrap();
        assert_eq!(ulimit.soft, 1024);
        assert_eq!(ulimit.hard, 2048);
        assert_eq!(ulimit.rlimit_type(), "RLIMIT_NOFILE");
        assert_eq!(ulimit.to_string(), "nofile=1024:2048");
    }

    #[test]
    fn single_value_sets_both() {
        let ulimit: Ulimit = "NPROC=4096".parse().unwrap();
        assert_eq!(ulimit.name, "nproc");
        assert_eq!((ulimit.soft, ulimit.hard), (4096, 4096));
    }

    #[test]
    fn unlimited_hard_limit() {
        let ulimit: Ulimit = "core=100:-1".parse().unwrap();
        assert_eq!(ulimit.hard, -1);
        assert!("core=-1:100".parse::<Ulimit>().is_err());
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["nofile", "bogus=1:2", "nofile=2:1", "nofile=a:b", "nofile=-5"] {
            assert!(bad.parse::<Ulimit>().is_err(), "{bad:?}");
        }
    }

    #[test]
    fn load_collects_all() {
        let config =
            UlimitsConfig::load(&["nofile=1024:2048".to_string(), "nproc=10".to_string()]).unwrap();
        assert_eq!(config.ulimits().len(), 2);
        assert!(UlimitsConfig::load(&["x=1".to_string()]).is_err());
    }
}
