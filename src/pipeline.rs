//! Metering pipeline: orchestrates a single tick, sampling, appending,
//! deciding, submitting, and updating state.

use crate::backend::BackendRegistry;
use crate::cache::{add_usage_record, CacheDocument, LastBill};
use crate::calculator::get_billable_usage;
use crate::config::Config;
use crate::csp_config::update_csp_config;
use crate::dimensions::get_billing_dimensions;
use crate::error::AdapterError;
use crate::time::{date_to_string, get_now};
use chrono::{DateTime, Utc};

/// Perform one event loop tick: sample, append, and, if a bill or heartbeat
/// is due, meter. Returns the tick's observed `now`.
pub async fn event_loop_handler(
    registry: &BackendRegistry,
    config: &Config,
) -> Result<DateTime<Utc>, AdapterError> {
    let sample = registry
        .usage
        .get_usage_data(config)
        .await
        .map_err(|e| AdapterError::Sample(e.to_string()))?;

    add_usage_record(registry, config, sample).await?;

    let cache = registry
        .storage
        .get_cache(config)
        .await?
        .ok_or_else(|| AdapterError::Persistence("cache document does not exist".into()))?;

    let now = get_now();

    if now >= cache.next_bill_time {
        process_metering(registry, config, cache, false).await?;
    } else if now >= cache.next_reporting_time {
        process_metering(registry, config, cache, true).await?;
    }

    Ok(now)
}

/// Deterministic idempotency token for a bill period: a replay of the same
/// `(adapter_start_time, next_bill_time)` pair always yields the same id, so
/// a conforming metering backend can deduplicate retried submissions.
fn make_record_id(adapter_start_time: DateTime<Utc>, next_bill_time: DateTime<Utc>) -> String {
    format!(
        "{}:{}",
        date_to_string(adapter_start_time),
        date_to_string(next_bill_time)
    )
}

/// Compute billable usage for the current period, map it to billed
/// dimensions, submit, and update the cache and CSP config documents.
///
/// Submission failures and dimension-mapping failures are recorded on the
/// CSP config document and do not escape this function: the next tick will
/// retry against the same, unmodified cache.
pub async fn process_metering(
    registry: &BackendRegistry,
    config: &Config,
    cache: CacheDocument,
    empty_metering: bool,
) -> Result<(), AdapterError> {
    let now = get_now();
    let closing_bill_time = cache.next_bill_time;
    let adapter_start_time = cache.adapter_start_time;

    let (s_in, s_out): (Vec<_>, Vec<_>) = cache.usage_records.into_iter().partition(|record| {
        record.reporting_time < closing_bill_time && record.reporting_time >= adapter_start_time
    });

    let billable_usage = get_billable_usage(&s_in, config, empty_metering);

    let dimensions = match get_billing_dimensions(config, &billable_usage) {
        Ok(dimensions) => dimensions,
        Err(e) => {
            tracing::error!(error = %e, "dimension mapping failed, treating as submission failure");
            update_csp_config(registry, config, false, Some(e.to_string()), None, None).await?;
            return Ok(());
        }
    };

    let record_id = make_record_id(cache.adapter_start_time, closing_bill_time);

    let submission = registry
        .metering
        .meter_billing(config, &dimensions, now, false, &record_id)
        .await;

    let record_id = match submission {
        Ok(record_id) => record_id,
        Err(e) => {
            tracing::warn!(error = %e, "metering submission failed, will retry next tick");
            update_csp_config(registry, config, false, Some(e.to_string()), None, None).await?;
            return Ok(());
        }
    };

    if empty_metering {
        update_csp_config(registry, config, true, None, None, None).await?;

        let mut updated = CacheDocument {
            adapter_start_time: cache.adapter_start_time,
            next_bill_time: cache.next_bill_time,
            next_reporting_time: now + chrono::Duration::seconds(config.reporting_interval as i64),
            usage_records: s_in,
            last_bill: cache.last_bill,
        };
        updated.usage_records.extend(s_out);

        if let Err(e) = registry.storage.save_cache(config, &updated).await {
            tracing::error!(
                error = %e,
                "cache persistence failed after successful heartbeat; next tick will resample the same period"
            );
        }

        tracing::info!(record_id, "heartbeat submitted");
    } else {
        let mut next_bill_time =
            closing_bill_time + chrono::Duration::seconds(config.billing_interval as i64);
        while now >= next_bill_time {
            next_bill_time += chrono::Duration::seconds(config.billing_interval as i64);
        }

        update_csp_config(
            registry,
            config,
            true,
            None,
            Some(billable_usage.clone()),
            Some(now),
        )
        .await?;

        let updated = CacheDocument {
            adapter_start_time: cache.adapter_start_time,
            next_bill_time,
            next_reporting_time: now + chrono::Duration::seconds(config.reporting_interval as i64),
            usage_records: s_out,
            last_bill: Some(LastBill {
                dimensions,
                metering_time: now,
                record_id: record_id.clone(),
            }),
        };

        if let Err(e) = registry.storage.save_cache(config, &updated).await {
            tracing::error!(
                error = %e,
                record_id,
                "cache persistence failed after successful real bill; the CSP config already \
                 recorded success, and the metering backend is expected to deduplicate a replay \
                 of this bill period by record_id"
            );
        }

        tracing::info!(record_id, next_bill_time = %date_to_string(next_bill_time), "real bill submitted");
    }

    Ok(())
}
