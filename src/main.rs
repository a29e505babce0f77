use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use csp_billing_adapter::backend::BackendRegistry;
use csp_billing_adapter::config::Config;
use csp_billing_adapter::{AdapterRunner, DEFAULT_CONFIG_PATH};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("csp-billing-adapter v{}", env!("CARGO_PKG_VERSION"));

    let exit_code = run().await;
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let config_path = std::env::var("CSP_ADAPTER_CONFIG_FILE")
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, path = %config_path, "failed to load configuration");
            return e.exit_code();
        }
    };

    let registry = match BackendRegistry::build(&config) {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!(error = %e, "failed to assemble backend registry");
            return e.exit_code();
        }
    };

    let runner = AdapterRunner::new(registry, config);

    if let Err(e) = runner.initial_setup().await {
        tracing::error!(error = %e, "initial setup failed");
        return e.exit_code();
    }

    match runner.run().await {
        Ok(()) => 0,
        Err(e) => e.exit_code(),
    }
}
