//! `[corral.metrics]`, `[corral.tracing]` and `[corral.stats]`.

use std::path::PathBuf;

use corral_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// Every metrics collector the runtime can enable.
pub const METRICS_COLLECTORS: [&str; 17] = [
    "image_pulls_layer_size",
    "containers_events_dropped_total",
    "containers_oom_total",
    "processes_defunct",
    "operations_total",
    "operations_latency_seconds",
    "operations_latency_seconds_total",
    "operations_errors_total",
    "image_pulls_bytes_total",
    "image_pulls_skipped_bytes_total",
    "image_pulls_failure_total",
    "image_pulls_success_total",
    "image_layer_reuse_total",
    "containers_oom_count_total",
    "containers_seccomp_notifier_count_total",
    "resources_stalled_at_stage",
    "containers_stopped_monitor_count",
];

/// Prefixes a collector name may be written with.
const COLLECTOR_PREFIXES: [&str; 2] = ["corral_", "container_runtime_"];

const MAX_SAMPLING_RATE_PER_MILLION: u32 = 1_000_000;

/// Metrics endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve metrics.
    pub enable_metrics: bool,
    /// Enabled collectors.
    pub metrics_collectors: Vec<String>,
    /// Listen address.
    pub metrics_host: String,
    /// Listen port.
    pub metrics_port: u16,
    /// Serve on a unix socket instead of TCP.
    pub metrics_socket: PathBuf,
    /// TLS certificate.
    pub metrics_cert: PathBuf,
    /// TLS key.
    pub metrics_key: PathBuf,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_collectors: METRICS_COLLECTORS.iter().map(ToString::to_string).collect(),
            metrics_host: "127.0.0.1".to_string(),
            metrics_port: 9090,
            metrics_socket: PathBuf::new(),
            metrics_cert: PathBuf::new(),
            metrics_key: PathBuf::new(),
        }
    }
}

impl MetricsConfig {
    /// Check that every collector is known.
    ///
    /// # Errors
    ///
    /// Returns the first unknown collector.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(unknown) = self
            .metrics_collectors
            .iter()
            .find(|name| !is_known_collector(name))
        {
            return Err(ConfigError::invalid(format!(
                "invalid metrics collector {unknown:?}"
            )));
        }
        Ok(())
    }
}

fn is_known_collector(name: &str) -> bool {
    let bare = COLLECTOR_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name);
    METRICS_COLLECTORS.contains(&bare)
}

/// Trace export settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Export traces.
    pub enable_tracing: bool,
    /// OTLP collector address.
    pub tracing_endpoint: String,
    /// Spans sampled per million. `1000000` samples everything.
    pub tracing_sampling_rate_per_million: u32,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enable_tracing: false,
            tracing_endpoint: "0.0.0.0:4317".to_string(),
            tracing_sampling_rate_per_million: 0,
        }
    }
}

impl TracingConfig {
    /// Check the sampling rate.
    ///
    /// # Errors
    ///
    /// Fails for rates above one million.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.tracing_sampling_rate_per_million > MAX_SAMPLING_RATE_PER_MILLION {
            return Err(ConfigError::invalid(format!(
                "tracing_sampling_rate_per_million must be at most {MAX_SAMPLING_RATE_PER_MILLION}, got {}",
                self.tracing_sampling_rate_per_million
            )));
        }
        Ok(())
    }
}

/// Stats collection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Seconds between stats collections. `0` collects on demand.
    pub stats_collection_period: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collectors_accept_prefixes() {
        let mut metrics = MetricsConfig::default();
        metrics.validate().unwrap();

        metrics.metrics_collectors = vec![
            "corral_operations_total".to_string(),
            "container_runtime_processes_defunct".to_string(),
        ];
        metrics.validate().unwrap();

        metrics.metrics_collectors.push("cpu_usage".to_string());
        assert!(metrics.validate().is_err());
    }

    #[test]
    fn sampling_rate_bound() {
        let mut tracing = TracingConfig {
            tracing_sampling_rate_per_million: 1_000_000,
            ..TracingConfig::default()
        };
        tracing.validate().unwrap();
        tracing.tracing_sampling_rate_per_million += 1;
        assert!(tracing.validate().is_err());
    }
}
