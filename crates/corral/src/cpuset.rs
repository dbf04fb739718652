//! Linux CPU list format (`0-3,5,7-8`).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use corral_common::ConfigError;

/// Upper bound on CPU ids, the kernel's largest `NR_CPUS`.
pub const MAX_CPUS: u32 = 8192;

/// A set of CPU ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuSet(BTreeSet<u32>);

impl CpuSet {
    /// Whether the set has no CPUs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of CPUs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether `cpu` is in the set.
    #[must_use]
    pub fn contains(&self, cpu: u32) -> bool {
        self.0.contains(&cpu)
    }

    /// CPU ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

impl FromStr for CpuSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: String| ConfigError::invalid(format!("invalid CPU set {s:?}: {why}"));
        let mut cpus = BTreeSet::new();

        for part in s.split(',').map(str::trim) {
            if part.is_empty() {
                if s.trim().is_empty() {
                    break;
                }
                return Err(invalid("empty element".to_string()));
            }
            let (start, end) = match part.split_once('-') {
                Some((start, end)) => (start, end),
                None => (part, part),
            };
            let start: u32 = start.parse().map_err(|e| invalid(format!("{part:?}: {e}")))?;
            let end: u32 = end.parse().map_err(|e| invalid(format!("{part:?}: {e}")))?;
            if start > end {
                return Err(invalid(format!("range {part:?} is reversed")));
            }
            if end >= MAX_CPUS {
                return Err(invalid(format!("CPU {end} is out of range, the limit is {MAX_CPUS}")));
            }
            cpus.extend(start..=end);
        }

        Ok(Self(cpus))
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for cpu in self.iter() {
            match ranges.last_mut() {
                Some((_, end)) if *end + 1 == cpu => *end = cpu,
                _ => ranges.push((cpu, cpu)),
            }
        }
        let rendered: Vec<String> = ranges
            .into_iter()
            .map(|(start, end)| {
                if start == end {
                    start.to_string()
                } else {
                    format!("{start}-{end}")
                }
            })
            .collect();
        f.write_str(&rendered.join(","))
    }
}
