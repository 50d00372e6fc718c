//! Wallet Service - Main Application Entry Point
//!
//! REST API and event consumer for wallet balances and their transaction ledger.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries, row locks)
//! - **Cache**: Redis, best-effort shadow of wallet reads
//! - **Messaging**: NATS JetStream, durable pull consumer with dead-lettering
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Connect the cache and the message bus
//! 4. Start the transaction subscriber workers
//! 5. Serve HTTP until Ctrl-C, then drain the subscriber and pending publishes

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use wallet_service::{
    cache::RedisWalletCache,
    config::Config,
    db,
    handlers::{self, AppState},
    messaging::{NatsBus, TransactionSubscriber},
    metrics::PrometheusMetrics,
    repository::{PgTransactionRepository, PgWalletRepository},
    services::{TransactionService, WalletService},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let cache = Arc::new(RedisWalletCache::connect(&config.redis_url, config.cache_ttl()).await?);
    tracing::info!("Redis cache connected");

    let bus = Arc::new(NatsBus::connect(&config.nats_url).await?);
    tracing::info!("NATS JetStream connected");

    let registry = Arc::new(PrometheusMetrics::new()?);

    let wallets = Arc::new(WalletService::new(
        PgWalletRepository::new(pool.clone()),
        PgTransactionRepository::new(pool.clone()),
        cache,
        bus.clone(),
        registry.clone(),
        config.retry_policy(),
    ));
    let transactions = Arc::new(TransactionService::new(
        PgWalletRepository::new(pool.clone()),
        PgTransactionRepository::new(pool),
        bus.clone(),
    ));

    let shutdown = CancellationToken::new();

    let settings = config.subscriber_settings();
    let streams = bus.worker_streams(&settings).await?;
    let subscriber = Arc::new(TransactionSubscriber::new(
        wallets.clone(),
        bus,
        registry.clone(),
        settings,
    ));
    let subscriber_task = tokio::spawn(subscriber.run(streams, shutdown.clone()));

    let app = handlers::router(
        AppState {
            wallets: wallets.clone(),
            transactions,
            registry,
        },
        config.request_timeout(),
    );

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    subscriber_task.await?;
    wallets.drain().await;
    tracing::info!("Shutdown complete");

    Ok(())
}
