//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to a service
//! 3. Returns HTTP response (JSON, status code)
//!
//! Handlers are generic over the stores so the same router serves the
//! Postgres adapters in production and the in-process ones in tests.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::metrics::PrometheusMetrics;
use crate::repository::{BalanceStore, LedgerStore};
use crate::services::{TransactionService, WalletService};

/// Health check and metrics endpoints
pub mod health;
/// Transaction endpoints
pub mod transactions;
/// Wallet and charge endpoints
pub mod wallets;

/// Shared state handed to every handler.
pub struct AppState<S, L> {
    pub wallets: Arc<WalletService<S, L>>,
    pub transactions: Arc<TransactionService<S, L>>,
    pub registry: Arc<PrometheusMetrics>,
}

impl<S, L> Clone for AppState<S, L> {
    fn clone(&self) -> Self {
        Self {
            wallets: self.wallets.clone(),
            transactions: self.transactions.clone(),
            registry: self.registry.clone(),
        }
    }
}

/// Build the HTTP router.
///
/// Requests running longer than `request_timeout` are aborted with 408.
/// Dropping the handler future rolls back any store transaction it had open.
/// Work that runs after a commit is detached from the request.
pub fn router<S, L>(state: AppState<S, L>, request_timeout: Duration) -> Router
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    Router::new()
        .route("/health", get(health::health_check::<S, L>))
        .route("/metrics", get(health::metrics::<S, L>))
        .route("/api/v1/wallet", post(wallets::create_wallet::<S, L>))
        .route("/api/v1/wallet/charge", post(wallets::charge_wallet::<S, L>))
        .route(
            "/api/v1/wallet/mobile/{mobile}",
            get(wallets::get_wallet_by_mobile::<S, L>),
        )
        .route("/api/v1/wallet/{id}", get(wallets::get_wallet::<S, L>))
        .route(
            "/api/v1/wallet/{id}/transactions",
            get(wallets::list_wallet_transactions::<S, L>),
        )
        .route(
            "/api/v1/transactions",
            post(transactions::create_transaction::<S, L>),
        )
        .route(
            "/api/v1/transactions/{id}",
            get(transactions::get_transaction::<S, L>),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
