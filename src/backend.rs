//! Backend abstraction layer: the capability set consumed from pluggable
//! sampling, storage, and metering collaborators (see spec §6.1), plus an
//! explicit startup registry binding one concrete implementation per
//! capability by configured name.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::{CacheDocument, UsageRecord};
use crate::config::Config;
use crate::csp_config::CspConfigDocument;
use crate::error::AdapterError;

pub mod local;

/// Produces usage samples from the product-specific collector.
#[async_trait]
pub trait UsageBackend: Send + Sync {
    /// Produce one usage record with `reporting_time = now` and one integer
    /// per metric declared in `config.usage_metrics`.
    async fn get_usage_data(&self, config: &Config) -> Result<UsageRecord, AdapterError>;
}

/// Durable storage for the two persisted documents.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// One-time initialization, invoked before any get/save call.
    async fn setup_adapter(&self, config: &Config) -> Result<(), AdapterError>;

    async fn get_cache(&self, config: &Config) -> Result<Option<CacheDocument>, AdapterError>;
    async fn save_cache(&self, config: &Config, doc: &CacheDocument) -> Result<(), AdapterError>;

    async fn get_csp_config(
        &self,
        config: &Config,
    ) -> Result<Option<CspConfigDocument>, AdapterError>;
    async fn save_csp_config(
        &self,
        config: &Config,
        doc: &CspConfigDocument,
    ) -> Result<(), AdapterError>;
}

/// Submits a metering charge to the CSP marketplace metering API.
#[async_trait]
pub trait MeteringBackend: Send + Sync {
    /// Submit `dimensions` for billing at `timestamp`. `record_id` is a
    /// caller-assigned idempotency token derived from
    /// `(adapter_start_time, next_bill_time)`; a conforming backend
    /// deduplicates retried submissions that carry the same id. Returns the
    /// backend's accepted record id on success.
    async fn meter_billing(
        &self,
        config: &Config,
        dimensions: &BTreeMap<String, i64>,
        timestamp: DateTime<Utc>,
        dry_run: bool,
        record_id: &str,
    ) -> Result<String, AdapterError>;
}

/// Explicit registry binding one concrete backend implementation per
/// capability, resolved by configured name at startup.
pub struct BackendRegistry {
    pub usage: Arc<dyn UsageBackend>,
    pub storage: Arc<dyn StorageBackend>,
    pub metering: Arc<dyn MeteringBackend>,
}

impl BackendRegistry {
    /// Bind backends named in `config`. An unrecognized backend name is a
    /// fatal startup error.
    pub fn build(config: &Config) -> Result<Self, AdapterError> {
        let usage: Arc<dyn UsageBackend> = match config.usage_backend.as_str() {
            "local" => Arc::new(local::LocalUsageBackend::new()),
            other => {
                return Err(AdapterError::BackendUnavailable(format!(
                    "no usage sampling backend registered for '{other}'"
                )))
            }
        };

        let storage: Arc<dyn StorageBackend> = match config.storage_backend.as_str() {
            "local" => Arc::new(local::LocalStorageBackend),
            other => {
                return Err(AdapterError::BackendUnavailable(format!(
                    "no storage backend registered for '{other}'"
                )))
            }
        };

        let metering: Arc<dyn MeteringBackend> = match config.metering_backend.as_str() {
            "local" => Arc::new(local::LocalMeteringBackend::new()),
            other => {
                return Err(AdapterError::BackendUnavailable(format!(
                    "no metering backend registered for '{other}'"
                )))
            }
        };

        tracing::info!(
            usage_backend = %config.usage_backend,
            storage_backend = %config.storage_backend,
            metering_backend = %config.metering_backend,
            "backend registry assembled"
        );

        Ok(Self {
            usage,
            storage,
            metering,
        })
    }
}
