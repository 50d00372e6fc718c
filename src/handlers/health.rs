//! Health check and metrics endpoints for service monitoring.

use axum::{Json, extract::State, http::header, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::AppError,
    handlers::AppState,
    repository::{BalanceStore, LedgerStore},
};

/// Health check response.
///
/// Returns service status and database connectivity.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: String,

    /// Database connection status
    pub database: String,

    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "database": "connected",
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
///
/// If the store is unreachable, returns the standard error response.
pub async fn health_check<S, L>(
    State(state): State<AppState<S, L>>,
) -> Result<Json<HealthResponse>, AppError>
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    state.wallets.ping().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        database: "connected".to_string(),
        timestamp: Utc::now(),
    }))
}

/// Prometheus text exposition of the service counters.
pub async fn metrics<S, L>(
    State(state): State<AppState<S, L>>,
) -> Result<impl IntoResponse, AppError>
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    let body = state
        .registry
        .render()
        .map_err(|e| AppError::Persistence(e.to_string()))?;

    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
