//! csp-billing-adapter: a metering daemon that samples product usage on a
//! fixed interval, aggregates it into a billing period, maps it to a CSP
//! marketplace's tiered pricing dimensions, and reports it through a
//! pluggable metering backend.

pub mod backend;
pub mod cache;
pub mod calculator;
pub mod config;
pub mod csp_config;
pub mod dimensions;
pub mod error;
pub mod pipeline;
pub mod time;

use std::time::Duration as StdDuration;

use tokio::time::sleep;

use backend::BackendRegistry;
use config::Config;
use error::AdapterError;

/// Default location of the adapter's YAML config file, used when
/// `CSP_ADAPTER_CONFIG_FILE` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/csp_billing_adapter/config.yaml";

/// Owns the backend registry and config for the adapter's lifetime and
/// drives its event loop.
pub struct AdapterRunner {
    registry: BackendRegistry,
    config: Config,
}

impl AdapterRunner {
    pub fn new(registry: BackendRegistry, config: Config) -> Self {
        Self { registry, config }
    }

    /// One-time startup: initialize storage and create the persisted
    /// documents if this is the adapter's first run.
    pub async fn initial_setup(&self) -> Result<(), AdapterError> {
        self.registry.storage.setup_adapter(&self.config).await?;

        if self.registry.storage.get_cache(&self.config).await?.is_none() {
            cache::create_cache(&self.registry, &self.config).await?;
        }

        if self
            .registry
            .storage
            .get_csp_config(&self.config)
            .await?
            .is_none()
        {
            csp_config::create_csp_config(&self.registry, &self.config).await?;
        }

        Ok(())
    }

    /// Run the event loop until ctrl-c is received or a fatal error occurs.
    ///
    /// A recoverable error from a single tick is logged and the loop
    /// continues; a fatal error (see [`AdapterError::is_fatal`]) is
    /// propagated to the caller, which is expected to exit the process.
    pub async fn run(&self) -> Result<(), AdapterError> {
        tracing::info!(
            query_interval = self.config.query_interval,
            "entering event loop"
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received shutdown signal, exiting");
                    return Ok(());
                }
                result = pipeline::event_loop_handler(&self.registry, &self.config) => {
                    match result {
                        Ok(now) => {
                            tracing::debug!(now = %time::date_to_string(now), "tick complete");
                        }
                        Err(e) if e.is_fatal() => {
                            tracing::error!(error = %e, "fatal error, exiting event loop");
                            return Err(e);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "recoverable error, continuing");
                        }
                    }
                }
            }

            sleep(StdDuration::from_secs(self.config.query_interval)).await;
        }
    }
}
