//! The beat scheduler daemon.
//!
//! Runs exactly once per deployment: loads the enabled schedules, starts
//! the tick loop, and (unless disabled) listens for mutation events to
//! shorten reaction latency. A termination signal completes the in-flight
//! tick before exiting.

mod config;

use crate::config::BeatConfig;
use marketbeat_bus::{NatsDispatchQueue, NatsEventBus};
use marketbeat_scheduler::{Beat, run_listener};
use marketbeat_store::PgScheduleStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = BeatConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    // Wire the stores and the dispatch queue
    let store = Arc::new(PgScheduleStore::new(db_pool.clone()));
    let nats_config = config.nats_config();
    let queue = Arc::new(
        NatsDispatchQueue::connect(nats_config.clone())
            .await
            .expect("failed to connect to dispatch queue"),
    );

    let options = config.beat_options().expect("invalid cron timezone");
    let beat = Beat::load(store, queue, options)
        .await
        .expect("failed to load schedule snapshot");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Event-driven resync listener
    let listener_handle = if config.mutation_sync_enabled {
        let bus = Arc::new(
            NatsEventBus::connect(&nats_config)
                .await
                .expect("failed to connect to event bus"),
        );
        Some(tokio::spawn(run_listener(
            bus,
            beat.resync_handle(),
            shutdown_rx.clone(),
        )))
    } else {
        tracing::info!("Event-driven resync disabled; relying on periodic resync");
        None
    };

    let beat_handle = tokio::spawn(beat.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = beat_handle.await;
    if let Some(handle) = listener_handle {
        let _ = handle.await;
    }
}
