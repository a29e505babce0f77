//! Reference "local" backend family: an in-process usage sampler, a
//! JSON-file storage backend, and a metering submitter that accepts every
//! charge (optionally simulating failure for tests). Sufficient for
//! standalone operation; real CSP marketplace wiring is out of scope.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{MeteringBackend, StorageBackend, UsageBackend};
use crate::cache::{CacheDocument, UsageRecord};
use crate::config::Config;
use crate::csp_config::CspConfigDocument;
use crate::error::AdapterError;
use crate::time::get_now;

/// Generates synthetic usage samples in `[1, 20]` for every declared metric.
pub struct LocalUsageBackend {
    range: std::ops::RangeInclusive<i64>,
}

impl LocalUsageBackend {
    pub fn new() -> Self {
        Self { range: 1..=20 }
    }
}

impl Default for LocalUsageBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageBackend for LocalUsageBackend {
    async fn get_usage_data(&self, config: &Config) -> Result<UsageRecord, AdapterError> {
        let mut rng = rand::thread_rng();

        let metrics = config
            .usage_metrics
            .keys()
            .map(|metric| (metric.clone(), rng.gen_range(self.range.clone())))
            .collect::<BTreeMap<String, i64>>();

        Ok(UsageRecord {
            reporting_time: get_now(),
            metrics,
        })
    }
}

/// Persists both documents as JSON files beneath `config.storage_dir`.
pub struct LocalStorageBackend;

#[async_trait]
impl StorageBackend for LocalStorageBackend {
    async fn setup_adapter(&self, config: &Config) -> Result<(), AdapterError> {
        tokio::fs::create_dir_all(&config.storage_dir)
            .await
            .map_err(|e| {
                AdapterError::Persistence(format!(
                    "failed to create storage directory '{}': {e}",
                    config.storage_dir.display()
                ))
            })
    }

    async fn get_cache(&self, config: &Config) -> Result<Option<CacheDocument>, AdapterError> {
        read_json(&config.cache_path()).await
    }

    async fn save_cache(&self, config: &Config, doc: &CacheDocument) -> Result<(), AdapterError> {
        write_json(&config.cache_path(), doc).await
    }

    async fn get_csp_config(
        &self,
        config: &Config,
    ) -> Result<Option<CspConfigDocument>, AdapterError> {
        read_json(&config.csp_config_path()).await
    }

    async fn save_csp_config(
        &self,
        config: &Config,
        doc: &CspConfigDocument,
    ) -> Result<(), AdapterError> {
        write_json(&config.csp_config_path(), doc).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AdapterError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
            AdapterError::Persistence(format!("failed to parse '{}': {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AdapterError::Persistence(format!(
            "failed to read '{}': {e}",
            path.display()
        ))),
    }
}

async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), AdapterError> {
    let content = serde_json::to_string_pretty(value).map_err(|e| {
        AdapterError::Persistence(format!("failed to serialize '{}': {e}", path.display()))
    })?;

    tokio::fs::write(path, content).await.map_err(|e| {
        AdapterError::Persistence(format!("failed to write '{}': {e}", path.display()))
    })
}

/// Accepts every submission unless a test has flipped its failure switch,
/// in which case it reports a submission error. Mirrors the reference
/// implementation's `local_csp` test double, which used a random failure
/// injection hook for the same purpose.
pub struct LocalMeteringBackend {
    fail: Arc<AtomicBool>,
}

impl LocalMeteringBackend {
    pub fn new() -> Self {
        Self {
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle tests can use to toggle submission failure on and off.
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        self.fail.clone()
    }
}

impl Default for LocalMeteringBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MeteringBackend for LocalMeteringBackend {
    async fn meter_billing(
        &self,
        _config: &Config,
        _dimensions: &BTreeMap<String, i64>,
        _timestamp: DateTime<Utc>,
        _dry_run: bool,
        record_id: &str,
    ) -> Result<String, AdapterError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AdapterError::Submission(
                "local metering backend: simulated submission failure".into(),
            ));
        }

        Ok(record_id.to_string())
    }
}
