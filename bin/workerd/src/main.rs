//! The worker pool daemon.
//!
//! Registers the built-in tasks, opens N consumers on the dispatch queue,
//! and runs them until a termination signal arrives. Each worker finishes
//! its in-flight task before exiting.

mod config;

use crate::config::WorkerConfig;
use marketbeat_bus::NatsDispatchQueue;
use marketbeat_integration::{
    HttpTokenProvider, MarketApiClient, MemoryTtlStore, RateLimiter, TokenCache,
};
use marketbeat_store::PgExecutionLogStore;
use marketbeat_tasks::{FetchListedInfoTask, ListedInfoRepository};
use marketbeat_worker::{TaskRegistry, TtlLockService, Worker};
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
    let config = WorkerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations (idempotent; whichever daemon starts first applies them)
    tracing::info!("Running database migrations...");
    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    // Shared caches: tokens and execution-policy locks ride the same store
    let ttl_store = Arc::new(MemoryTtlStore::new());
    let locks = Arc::new(TtlLockService::new(ttl_store.clone()));

    let provider = Arc::new(
        HttpTokenProvider::new(config.api.clone()).expect("failed to build token provider"),
    );
    let tokens = Arc::new(TokenCache::new(ttl_store, provider));
    let client = Arc::new(
        MarketApiClient::new(config.api.clone(), tokens).expect("failed to build API client"),
    );
    let limiter = RateLimiter::new(config.external_api_limit());

    // Register the built-in tasks
    let mut registry = TaskRegistry::new();
    registry.register_noop();
    Arc::new(FetchListedInfoTask::new(
        client,
        limiter,
        ListedInfoRepository::new(db_pool.clone()),
    ))
    .register(&mut registry);
    let registry = Arc::new(registry);
    tracing::info!(tasks = ?registry.names(), "Registered tasks");

    // Open the dispatch queue
    let queue = NatsDispatchQueue::connect(config.nats_config())
        .await
        .expect("failed to connect to dispatch queue");

    let logs = Arc::new(PgExecutionLogStore::new(db_pool));
    let worker = Arc::new(Worker::new(
        registry,
        logs,
        locks,
        config.worker_options(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::with_capacity(config.concurrency);
    for _ in 0..config.concurrency {
        let consumer = queue
            .consumer()
            .await
            .expect("failed to open dispatch consumer");
        handles.push(tokio::spawn(
            Arc::clone(&worker).run(Box::new(consumer), shutdown_rx.clone()),
        ));
    }
    tracing::info!(workers = config.concurrency, "Worker pool started");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
}
