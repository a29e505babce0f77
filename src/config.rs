//! Adapter configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// Top-level adapter configuration, loaded once from the YAML file located
/// by `CSP_ADAPTER_CONFIG_FILE` (see [`crate::DEFAULT_CONFIG_PATH`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between event loop ticks.
    pub query_interval: u64,
    /// Seconds between heartbeat submissions when no bill is due.
    pub reporting_interval: u64,
    /// Length of a bill period, in seconds.
    pub billing_interval: u64,
    /// Metric name to metering configuration.
    pub usage_metrics: BTreeMap<String, MetricConfig>,

    /// Name of the registered sampling backend to bind at startup.
    #[serde(default = "default_backend_name")]
    pub usage_backend: String,
    /// Name of the registered storage backend to bind at startup.
    #[serde(default = "default_backend_name")]
    pub storage_backend: String,
    /// Name of the registered metering backend to bind at startup.
    #[serde(default = "default_backend_name")]
    pub metering_backend: String,

    /// Directory the `local` storage backend persists its documents under.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

fn default_backend_name() -> String {
    "local".to_string()
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("/var/lib/csp-billing-adapter")
}

/// Per-metric aggregation and tiered-pricing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricConfig {
    pub usage_aggregate: UsageAggregate,
    pub consumption_reporting: ConsumptionReporting,
    pub dimensions: Vec<Tier>,
}

/// How a metric's per-period samples reduce to a single billable quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageAggregate {
    Average,
    Maximum,
}

/// How the billable quantity is reported to the CSP. Volume-tier mapping is
/// the only consumption model this crate implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionReporting {
    Volume,
}

/// A single price tier: `[minimum, maximum]` inclusive, `maximum = None`
/// meaning unbounded above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub dimension: String,
    pub minimum: i64,
    pub maximum: Option<i64>,
}

impl Tier {
    fn contains(&self, value: i64) -> bool {
        value >= self.minimum && self.maximum.map_or(true, |max| value <= max)
    }
}

impl Config {
    /// Load, parse, and validate the config file at `path`.
    pub fn load(path: &str) -> Result<Self, AdapterError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AdapterError::Config(format!("failed to read config file '{path}': {e}"))
        })?;

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            AdapterError::Config(format!("failed to parse config file '{path}': {e}"))
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Structural validation. Fails fast on malformed intervals or
    /// structurally invalid tiers; only warns on a tier-coverage gap or a
    /// `billing_interval` that isn't a multiple of `reporting_interval`, so
    /// that a deliberately broken tier set still loads and fails later at
    /// runtime (see [`crate::dimensions`]).
    fn validate(&self) -> Result<(), AdapterError> {
        if self.query_interval == 0 || self.reporting_interval == 0 || self.billing_interval == 0
        {
            return Err(AdapterError::Config(
                "query_interval, reporting_interval, and billing_interval must be non-zero".into(),
            ));
        }

        if self.billing_interval % self.reporting_interval != 0 {
            tracing::warn!(
                billing_interval = self.billing_interval,
                reporting_interval = self.reporting_interval,
                "billing_interval is not an integer multiple of reporting_interval"
            );
        }

        if self.usage_metrics.is_empty() {
            return Err(AdapterError::Config(
                "usage_metrics must declare at least one metric".into(),
            ));
        }

        for (metric, metric_config) in &self.usage_metrics {
            validate_tier_shape(metric, &metric_config.dimensions)?;
            warn_on_coverage_gap(metric, &metric_config.dimensions);
        }

        Ok(())
    }

    /// Path the `local` storage backend persists the usage-record cache to.
    pub fn cache_path(&self) -> PathBuf {
        self.storage_dir.join("cache.json")
    }

    /// Path the `local` storage backend persists the CSP config document to.
    pub fn csp_config_path(&self) -> PathBuf {
        self.storage_dir.join("csp_config.json")
    }

    /// Find the first declared tier (in declared order) whose range contains
    /// `value` for `metric`.
    pub fn matching_tier<'a>(&'a self, metric: &str, value: i64) -> Option<&'a Tier> {
        self.usage_metrics
            .get(metric)?
            .dimensions
            .iter()
            .find(|tier| tier.contains(value))
    }
}

fn validate_tier_shape(metric: &str, tiers: &[Tier]) -> Result<(), AdapterError> {
    if tiers.is_empty() {
        return Err(AdapterError::Config(format!(
            "metric '{metric}' declares no dimensions"
        )));
    }

    for tier in tiers {
        if tier.minimum < 0 {
            return Err(AdapterError::Config(format!(
                "metric '{metric}' tier '{}' has a negative minimum",
                tier.dimension
            )));
        }
        if let Some(max) = tier.maximum {
            if max < tier.minimum {
                return Err(AdapterError::Config(format!(
                    "metric '{metric}' tier '{}' has maximum < minimum",
                    tier.dimension
                )));
            }
        }
    }

    Ok(())
}

fn warn_on_coverage_gap(metric: &str, tiers: &[Tier]) {
    let mut sorted: Vec<&Tier> = tiers.iter().collect();
    sorted.sort_by_key(|t| t.minimum);

    if sorted[0].minimum != 0 {
        tracing::warn!(metric, "tier set does not start at minimum 0");
        return;
    }

    for window in sorted.windows(2) {
        let (prev, next) = (window[0], window[1]);
        match prev.maximum {
            Some(prev_max) if next.minimum == prev_max + 1 => {}
            Some(prev_max) => {
                tracing::warn!(
                    metric,
                    boundary = prev_max,
                    "tier set has a gap or overlap"
                );
                return;
            }
            None => {
                tracing::warn!(
                    metric,
                    "an unbounded tier is followed by additional tiers; those are unreachable"
                );
                return;
            }
        }
    }

    if sorted.last().unwrap().maximum.is_some() {
        tracing::warn!(
            metric,
            "tier set does not cover [0, infinity); values above the last tier will fail to map"
        );
    }
}
