//! db-helper - connectivity check for the configured databases.
//!
//! Opens each requested database through the connection registry, pings it
//! and prints its server version.

use clap::Parser;
use db_helper::config::Config;
use db_helper::db::ConnectionRegistry;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries the report.
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    init_tracing(&config);

    info!(
        config = %config.config.display(),
        test_mode = config.test_mode,
        "Starting db-helper v{}",
        env!("CARGO_PKG_VERSION")
    );

    let registry = ConnectionRegistry::from_path(config.config.clone());
    registry.set_test_mode(config.test_mode);

    let result = check_databases(&registry, &config).await;
    registry.close_all().await;

    if let Err(e) = result {
        match e.suggestion() {
            Some(suggestion) => error!(error = %e, suggestion = %suggestion, "Check failed"),
            None => error!(error = %e, "Check failed"),
        }
        return Err(e.into());
    }

    info!("All databases reachable");
    Ok(())
}

async fn check_databases(
    registry: &ConnectionRegistry,
    config: &Config,
) -> Result<(), db_helper::DbError> {
    for database in &config.databases {
        let connection = registry
            .get_connection(database, config.server.as_deref())
            .await?;
        connection.ping().await?;

        let version = connection
            .server_version()
            .await
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "{}\t{}\t{}\t{}",
            connection.key(),
            connection.database_type(),
            connection.dsn(),
            version
        );
    }
    Ok(())
}
