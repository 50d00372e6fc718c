//! Transaction HTTP handlers.
//!
//! This module implements transaction-related API endpoints:
//! - POST /api/v1/transactions - Queue a transaction for asynchronous recording
//! - GET /api/v1/transactions/{id} - Get transaction details

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::AppError,
    handlers::AppState,
    models::{event::TransactionCreatedEvent, transaction::TransactionResponse},
    repository::{BalanceStore, LedgerStore},
};

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub idempotency_key: String,
}

/// Publish a transaction-created event.
///
/// # Request Body
///
/// ```json
/// {
///   "wallet_id": "550e8400-...",
///   "amount": 2500,
///   "type": "Deposit",
///   "idempotency_key": "deposit-001"
/// }
/// ```
///
/// # Response (202 Accepted)
///
/// The row is written later by the subscriber. Resubmitting with the
/// returned key never produces a second row.
///
/// ```json
/// { "idempotency_key": "deposit-001" }
/// ```
pub async fn create_transaction<S, L>(
    State(state): State<AppState<S, L>>,
    Json(event): Json<TransactionCreatedEvent>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError>
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    let idempotency_key = state.transactions.publish_create(event).await?;
    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { idempotency_key })))
}

pub async fn get_transaction<S, L>(
    State(state): State<AppState<S, L>>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, AppError>
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    let transaction = state.transactions.get_by_id(transaction_id).await?;
    Ok(Json(transaction.into()))
}
