//! pollwatch - device availability poller
//!
//! Polls network devices by ping and SNMP, tracks their up/down status with
//! hysteresis and serves the results over a JSON API.

mod config;
mod db;
mod probe;
mod scheduler;
mod status;
mod web;

use config::{EnvOptions, LayeredOptions, OptionSource, PollerConfig, ServerConfig};
use db::Store;
use scheduler::Scheduler;
use status::{HostHealthTracker, TrackerConfig};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pollwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting pollwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Poller options: environment first, then the settings table
    let env = EnvOptions;
    let options = LayeredOptions::new(vec![&env as &dyn OptionSource, store.as_ref()]);
    let tracker_cfg = TrackerConfig::load(&options);
    let poller_cfg = PollerConfig::load(&options);

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        HostHealthTracker::new(tracker_cfg),
        poller_cfg,
    ));
    scheduler.start().await?;

    // Start web server
    let server = Server::new(cfg, store, scheduler);
    server.start().await?;

    Ok(())
}
