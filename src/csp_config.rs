//! CSP config document: the persisted status record downstream consumers
//! use to tell whether the adapter's billing API access is healthy.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::BackendRegistry;
use crate::config::Config;
use crate::error::AdapterError;
use crate::time::{get_now, ts_format};

/// Bounded retention policy for `errors`: oldest entries are dropped first.
const MAX_RETAINED_ERRORS: usize = 16;

/// The persisted CSP config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CspConfigDocument {
    pub billing_api_access_ok: bool,
    #[serde(with = "ts_format")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "ts_format")]
    pub expire: DateTime<Utc>,
    pub errors: Vec<String>,
    #[serde(default)]
    pub usage: Option<BTreeMap<String, i64>>,
    #[serde(default, with = "crate::time::ts_format_option")]
    pub last_billed: Option<DateTime<Utc>>,
}

/// Create the CSP config document if none exists yet, and persist it.
pub async fn create_csp_config(
    registry: &BackendRegistry,
    config: &Config,
) -> Result<CspConfigDocument, AdapterError> {
    let now = get_now();
    let doc = CspConfigDocument {
        billing_api_access_ok: true,
        timestamp: now,
        expire: now + chrono::Duration::seconds(config.reporting_interval as i64),
        errors: Vec::new(),
        usage: None,
        last_billed: None,
    };

    registry.storage.save_csp_config(config, &doc).await?;
    tracing::info!("created CSP config document");

    Ok(doc)
}

/// Update the CSP config document to reflect the outcome of a metering
/// attempt. On success, clears `errors` and advances `timestamp`/`expire`.
/// On failure, clears the health flag and appends `error` to the bounded
/// `errors` list without advancing `timestamp`/`expire`.
pub async fn update_csp_config(
    registry: &BackendRegistry,
    config: &Config,
    success: bool,
    error: Option<String>,
    usage: Option<BTreeMap<String, i64>>,
    last_billed: Option<DateTime<Utc>>,
) -> Result<CspConfigDocument, AdapterError> {
    let mut doc = registry
        .storage
        .get_csp_config(config)
        .await?
        .ok_or_else(|| AdapterError::Persistence("CSP config document does not exist".into()))?;

    if success {
        let now = get_now();
        doc.billing_api_access_ok = true;
        doc.timestamp = now;
        doc.expire = now + chrono::Duration::seconds(config.reporting_interval as i64);
        doc.errors.clear();
        if let Some(usage) = usage {
            doc.usage = Some(usage);
        }
        if let Some(last_billed) = last_billed {
            doc.last_billed = Some(last_billed);
        }
    } else {
        doc.billing_api_access_ok = false;
        if let Some(error) = error {
            doc.errors.push(error);
            if doc.errors.len() > MAX_RETAINED_ERRORS {
                let overflow = doc.errors.len() - MAX_RETAINED_ERRORS;
                doc.errors.drain(0..overflow);
            }
        }
    }

    registry.storage.save_csp_config(config, &doc).await?;

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::{LocalMeteringBackend, LocalStorageBackend, LocalUsageBackend};
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
    async fn create_sets_healthy_defaults() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = test_registry();
        registry.storage.setup_adapter(&config).await.unwrap();

        let doc = create_csp_config(&registry, &config).await.unwrap();
        assert!(doc.billing_api_access_ok);
        assert!(doc.errors.is_empty());
        assert_eq!(
            doc.expire.timestamp() - doc.timestamp.timestamp(),
            config.reporting_interval as i64
        );
    }

    #[tokio::test]
    async fn failure_clears_health_and_appends_error() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = test_registry();
        registry.storage.setup_adapter(&config).await.unwrap();
        create_csp_config(&registry, &config).await.unwrap();

        let doc = update_csp_config(
            &registry,
            &config,
            false,
            Some("submission failed".into()),
            None,
            None,
        )
        .await
        .unwrap();

        assert!(!doc.billing_api_access_ok);
        assert_eq!(doc.errors, vec!["submission failed".to_string()]);
    }

    #[tokio::test]
    async fn success_clears_errors_and_advances_expiry() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = test_registry();
        registry.storage.setup_adapter(&config).await.unwrap();
        create_csp_config(&registry, &config).await.unwrap();

        update_csp_config(&registry, &config, false, Some("oops".into()), None, None)
            .await
            .unwrap();

        let doc = update_csp_config(&registry, &config, true, None, None, None)
            .await
            .unwrap();

        assert!(doc.billing_api_access_ok);
        assert!(doc.errors.is_empty());
    }

    #[tokio::test]
    async fn errors_list_is_bounded() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = test_registry();
        registry.storage.setup_adapter(&config).await.unwrap();
        create_csp_config(&registry, &config).await.unwrap();

        for i in 0..(MAX_RETAINED_ERRORS + 5) {
            update_csp_config(&registry, &config, false, Some(format!("error {i}")), None, None)
                .await
                .unwrap();
        }

        let doc = registry.storage.get_csp_config(&config).await.unwrap().unwrap();
        assert_eq!(doc.errors.len(), MAX_RETAINED_ERRORS);
        assert_eq!(doc.errors.last().unwrap(), &format!("error {}", MAX_RETAINED_ERRORS + 4));
    }
}
