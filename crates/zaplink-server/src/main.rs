// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Zaplink reconciliation server binary.
//!
//! Connects to the registry database, builds the fleet client, and runs the
//! HTTP API plus the background sync and sweep workers until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use zaplink_fleet::{FleetConfig, HttpFleet};
use zaplink_registry::PostgresRegistry;
use zaplink_server::config::Config;
use zaplink_server::runtime::ZaplinkRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zaplink=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        bind_addr = %config.bind_addr,
        fleet_url = %config.fleet_base_url,
        sync_interval_secs = config.sync_interval.as_secs(),
        "Starting zaplink reconciliation server"
    );

    // Connect to database
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Connected to database");

    PostgresRegistry::ensure_schema(&pool).await?;

    info!("Registry schema verified");

    let registry = Arc::new(PostgresRegistry::new(pool));
    let fleet = Arc::new(HttpFleet::new(FleetConfig {
        base_url: config.fleet_base_url.clone(),
        auth_token: config.fleet_auth_token.clone(),
        request_timeout: config.fleet_request_timeout,
    })?);

    let runtime = ZaplinkRuntime::builder()
        .registry(registry)
        .fleet(fleet)
        .bind_addr(config.bind_addr)
        .webhook_url(config.webhook_url.clone())
        .sync_interval(config.sync_interval)
        .sweep_interval(Duration::from_secs(60))
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await;

    info!("Zaplink server shut down");

    Ok(())
}
