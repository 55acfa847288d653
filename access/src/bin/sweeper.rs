//! Festival access expiry sweeper.
//!
//! This binary:
//! - Runs database migrations
//! - Connects to `PostgreSQL` (credentials) and `Redis` (proximity sessions)
//! - Optionally serves Prometheus metrics
//! - Sweeps expired credentials and proximity sessions until Ctrl+C
//!
//! # Usage
//!
//! ```bash
//! FESTIVAL_MASTER_SECRET=... DATABASE_URL=... REDIS_URL=... \
//!     cargo run --features postgres --bin festival-sweeper
//! ```

use anyhow::Context;
use festival_access::environment::system_clock;
use festival_access::stores::{PostgresStore, RedisProximityStore};
use festival_access::{
    AccessConfig, CredentialCodec, CredentialStore, KeyManager, ProximitySessionManager, Sweeper,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,festival_access=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AccessConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        redis = %config.storage.redis_url,
        sweep_interval_secs = config.storage.sweep_interval.num_seconds(),
        "Configuration loaded"
    );

    if let Some(port) = config.storage.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        festival_access::metrics::register_metrics();
        tracing::info!(port, "Serving metrics");
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.storage.max_connections)
        .connect(&config.storage.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let store = PostgresStore::new(pool);
    store.migrate().await?;

    let sessions = RedisProximityStore::new(
        &config.storage.redis_url,
        config.proximity.session_retention,
    )
    .await?;

    let clock = system_clock();
    let keys = Arc::new(KeyManager::new(store.clone(), &config.keys, clock.clone())?);
    let codec = Arc::new(CredentialCodec::new(keys, clock.clone()));
    let credentials = Arc::new(CredentialStore::new(
        store.clone(),
        codec,
        clock.clone(),
        config.credentials.clone(),
    ));
    let proximity = Arc::new(ProximitySessionManager::new(
        store,
        sessions,
        clock,
        config.proximity.clone(),
    ));

    let (sweeper, shutdown) =
        Sweeper::new(credentials, proximity, config.storage.sweep_interval)?;
    let handle = tokio::spawn(sweeper.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully...");

    let _ = shutdown.send(true);
    handle.await.context("Sweeper task panicked")?;
    Ok(())
}
