//! Dimension mapper: maps a metric's billable usage to the CSP's tiered
//! pricing dimension identifiers.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::AdapterError;

/// Find the first declared tier (in declared order) whose `[minimum, maximum]`
/// range contains `usage`, and record its dimension. Fails if no tier
/// matches, which indicates a configuration/tier gap at runtime.
pub fn get_volume_dimensions(
    config: &Config,
    usage_metric: &str,
    usage: i64,
    billed_dimensions: &mut BTreeMap<String, i64>,
) -> Result<(), AdapterError> {
    match config.matching_tier(usage_metric, usage) {
        Some(tier) => {
            billed_dimensions.insert(tier.dimension.clone(), usage);
            Ok(())
        }
        None => Err(AdapterError::NoMatchingVolumeDimension {
            metric: usage_metric.to_string(),
            value: usage,
        }),
    }
}

/// Map a full billable-usage map to billed dimensions. Fails atomically: if
/// any metric's usage has no matching tier, no partial dimensions are
/// returned.
pub fn get_billing_dimensions(
    config: &Config,
    billable_usage: &BTreeMap<String, i64>,
) -> Result<BTreeMap<String, i64>, AdapterError> {
    let mut billed_dimensions = BTreeMap::new();

    for (metric, usage) in billable_usage {
        get_volume_dimensions(config, metric, *usage, &mut billed_dimensions)?;
    }

    Ok(billed_dimensions)
}
