//! Billable-usage calculator: reduces a set of usage records over a billing
//! period to one non-negative integer per declared metric.

use std::collections::BTreeMap;

use crate::cache::UsageRecord;
use crate::config::{Config, UsageAggregate};

/// Integer mean, truncated toward zero, of `metric`'s values across
/// `records`. Records omitting the metric are skipped; an empty result set
/// yields `0`.
pub fn get_average_usage(metric: &str, records: &[UsageRecord]) -> i64 {
    let values: Vec<i64> = records
        .iter()
        .filter_map(|r| r.metrics.get(metric).copied())
        .collect();

    if values.is_empty() {
        return 0;
    }

    let sum: i64 = values.iter().sum();
    sum / values.len() as i64
}

/// Maximum of `metric`'s values across `records`. Records omitting the
/// metric are skipped; an empty result set yields `0`.
pub fn get_max_usage(metric: &str, records: &[UsageRecord]) -> i64 {
    records
        .iter()
        .filter_map(|r| r.metrics.get(metric).copied())
        .max()
        .unwrap_or(0)
}

/// Reduce `records` to one billable quantity per declared metric.
///
/// If `empty_usage` is set or `records` is empty, every metric maps to `0`
/// regardless of its configured aggregate.
pub fn get_billable_usage(
    records: &[UsageRecord],
    config: &Config,
    empty_usage: bool,
) -> BTreeMap<String, i64> {
    config
        .usage_metrics
        .iter()
        .map(|(metric, metric_config)| {
            let value = if empty_usage || records.is_empty() {
                0
            } else {
                match metric_config.usage_aggregate {
                    UsageAggregate::Average => get_average_usage(metric, records),
                    UsageAggregate::Maximum => get_max_usage(metric, records),
                }
            };
            (metric.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConsumptionReporting, MetricConfig, Tier};
    use crate::time::get_now;

    fn record(metric: &str, value: i64) -> UsageRecord {
        let mut metrics = BTreeMap::new();
        metrics.insert(metric.to_string(), value);
        UsageRecord {
            reporting_time: get_now(),
            metrics,
        }
    }

    #[test]
    fn average_of_empty_is_zero() {
        assert_eq!(get_average_usage("dim1", &[]), 0);
    }

    #[test]
    fn average_of_constant_sequence_is_the_constant() {
        let records = vec![record("dim1", 1), record("dim1", 1), record("dim1", 1)];
        assert_eq!(get_average_usage("dim1", &records), 1);
    }

    #[test]
    fn average_truncates_toward_zero() {
        let records = vec![record("dim2", 1), record("dim2", 2), record("dim2", 3)];
        assert_eq!(get_average_usage("dim2", &records), 2);
    }

    #[test]
    fn max_of_empty_is_zero() {
        assert_eq!(get_max_usage("dim1", &[]), 0);
    }

    #[test]
    fn max_equals_numeric_maximum() {
        let records = vec![record("dim2", 1), record("dim2", 2), record("dim2", 3)];
        assert_eq!(get_max_usage("dim2", &records), 3);
    }

    #[test]
    fn records_missing_a_metric_are_skipped() {
        let records = vec![record("dim1", 5), record("dim2", 99)];
        assert_eq!(get_average_usage("dim1", &records), 5);
    }

    fn metric_config(aggregate: UsageAggregate) -> Config {
        let mut usage_metrics = BTreeMap::new();
        usage_metrics.insert(
            "managed_node_count".to_string(),
            MetricConfig {
                usage_aggregate: aggregate,
                consumption_reporting: ConsumptionReporting::Volume,
                dimensions: vec![Tier {
                    dimension: "base".into(),
                    minimum: 0,
                    maximum: None,
                }],
            },
        );

        Config {
            query_interval: 30,
            reporting_interval: 300,
            billing_interval: 3600,
            usage_metrics,
            usage_backend: "local".into(),
            storage_backend: "local".into(),
            metering_backend: "local".into(),
            storage_dir: "/tmp".into(),
        }
    }

    #[test]
    fn empty_usage_flag_zeroes_every_metric() {
        let config = metric_config(UsageAggregate::Average);
        let records = vec![record("managed_node_count", 9)];

        let billable = get_billable_usage(&records, &config, true);

        assert_eq!(billable.get("managed_node_count"), Some(&0));
    }

    #[test]
    fn empty_input_zeroes_every_metric() {
        let config = metric_config(UsageAggregate::Maximum);

        let billable = get_billable_usage(&[], &config, false);

        assert_eq!(billable.get("managed_node_count"), Some(&0));
    }

    #[test]
    fn billable_usage_uses_configured_aggregate() {
        let config = metric_config(UsageAggregate::Average);
        let records = vec![
            record("managed_node_count", 1),
            record("managed_node_count", 2),
            record("managed_node_count", 3),
        ];

        let billable = get_billable_usage(&records, &config, false);

        assert_eq!(billable.get("managed_node_count"), Some(&2));
    }
}
