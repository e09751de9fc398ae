//! Account API server.
//!
//! Usage: `account-api [CONFIG_PATH]`. Without a path, built-in defaults are
//! used together with environment overrides.

use std::path::PathBuf;
use std::sync::Arc;

use account_api::clock::SystemClock;
use account_api::config::{self, loader, validation, AppConfig};
use account_api::lifecycle::{signals, App, StartupError};
use account_api::observability::{logging, metrics};
use account_api::{mail, tasks};
use tokio::net::TcpListener;

fn load(path: Option<PathBuf>) -> Result<AppConfig, StartupError> {
    match path {
        Some(path) => Ok(config::load_config(&path)?),
        None => {
            let mut config = AppConfig::default();
            loader::apply_env_overrides(&mut config, |key| std::env::var(key).ok());
            validation::validate_config(&config).map_err(config::ConfigError::Validation)?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load(std::env::args_os().nth(1).map(PathBuf::from))?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "account-api starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let pool = tasks::global(&config.workers);
    let mailer = mail::transport_from_config(&config.mail)?;
    let app = App::build(config, Arc::new(SystemClock), mailer, pool)?;

    signals::install(app.shutdown_handle());
    app.serve(listener).await?;

    Ok(())
}
