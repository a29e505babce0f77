//! Usage-record cache: the persisted document holding unbilled samples and
//! the adapter's bill/reporting period boundaries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::BackendRegistry;
use crate::config::Config;
use crate::error::AdapterError;
use crate::time::{get_now, next_bill_time, ts_format};

/// One usage sample produced by the sampling backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(with = "ts_format")]
    pub reporting_time: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, i64>,
}

/// The outcome of the most recent successful real bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastBill {
    pub dimensions: BTreeMap<String, i64>,
    #[serde(with = "ts_format")]
    pub metering_time: DateTime<Utc>,
    pub record_id: String,
}

/// The persisted usage-record cache document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheDocument {
    #[serde(with = "ts_format")]
    pub adapter_start_time: DateTime<Utc>,
    #[serde(with = "ts_format")]
    pub next_bill_time: DateTime<Utc>,
    #[serde(with = "ts_format")]
    pub next_reporting_time: DateTime<Utc>,
    pub usage_records: Vec<UsageRecord>,
    #[serde(default)]
    pub last_bill: Option<LastBill>,
}

impl CacheDocument {
    fn new(now: DateTime<Utc>, config: &Config) -> Self {
        Self {
            adapter_start_time: now,
            next_bill_time: next_bill_time(now, config.billing_interval),
            next_reporting_time: now + chrono::Duration::seconds(config.reporting_interval as i64),
            usage_records: Vec::new(),
            last_bill: None,
        }
    }
}

/// Create the cache document if none exists yet, and persist it.
pub async fn create_cache(
    registry: &BackendRegistry,
    config: &Config,
) -> Result<CacheDocument, AdapterError> {
    let doc = CacheDocument::new(get_now(), config);
    registry.storage.save_cache(config, &doc).await?;
    tracing::info!(
        adapter_start_time = %crate::time::date_to_string(doc.adapter_start_time),
        next_bill_time = %crate::time::date_to_string(doc.next_bill_time),
        "created usage-record cache"
    );
    Ok(doc)
}

/// Append a usage record to the cache, preserving insertion order.
///
/// Append is atomic at document granularity: either the full updated
/// document is persisted, or the caller observes a [`AdapterError::Persistence`]
/// (really a `CacheUpdateError` per the contract) and must not treat the
/// sample as committed.
pub async fn add_usage_record(
    registry: &BackendRegistry,
    config: &Config,
    record: UsageRecord,
) -> Result<CacheDocument, AdapterError> {
    let mut doc = registry
        .storage
        .get_cache(config)
        .await?
        .ok_or_else(|| AdapterError::Persistence("cache document does not exist".into()))?;

    doc.usage_records.push(record);

    registry
        .storage
        .save_cache(config, &doc)
        .await
        .map_err(|e| AdapterError::Persistence(format!("cache update failed: {e}")))?;

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::{LocalMeteringBackend, LocalStorageBackend, LocalUsageBackend};
    use crate::backend::BackendRegistry;
    use crate::config::{ConsumptionReporting, MetricConfig, Tier, UsageAggregate};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_config(storage_dir: std::path::PathBuf) -> Config {
        let mut usage_metrics = BTreeMap::new();
        usage_metrics.insert(
            "managed_node_count".to_string(),
            MetricConfig {
                usage_aggregate: UsageAggregate::Average,
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
            storage_dir,
        }
    }

    fn test_registry() -> BackendRegistry {
        BackendRegistry {
            usage: Arc::new(LocalUsageBackend::new()),
            storage: Arc::new(LocalStorageBackend),
            metering: Arc::new(LocalMeteringBackend::new()),
        }
    }

    #[tokio::test]
    async fn create_then_append_is_visible_on_read() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = test_registry();
        registry.storage.setup_adapter(&config).await.unwrap();

        let created = create_cache(&registry, &config).await.unwrap();
        assert!(created.usage_records.is_empty());

        let mut metrics = BTreeMap::new();
        metrics.insert("managed_node_count".to_string(), 3);
        let record = UsageRecord {
            reporting_time: get_now(),
            metrics,
        };

        add_usage_record(&registry, &config, record.clone())
            .await
            .unwrap();

        let read_back = registry.storage.get_cache(&config).await.unwrap().unwrap();
        assert_eq!(read_back.usage_records, vec![record]);
    }

    #[tokio::test]
    async fn append_without_create_fails() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = test_registry();
        registry.storage.setup_adapter(&config).await.unwrap();

        let record = UsageRecord {
            reporting_time: get_now(),
            metrics: BTreeMap::new(),
        };

        assert!(add_usage_record(&registry, &config, record).await.is_err());
    }
}
