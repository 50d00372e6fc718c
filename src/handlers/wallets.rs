//! Wallet HTTP handlers.
//!
//! This module implements the wallet API endpoints:
//! - POST /api/v1/wallet - Create a wallet
//! - GET /api/v1/wallet/{id} - Get wallet by id
//! - GET /api/v1/wallet/mobile/{mobile} - Get wallet by mobile number
//! - POST /api/v1/wallet/charge - Credit a wallet, opening it if needed
//! - GET /api/v1/wallet/{id}/transactions - Ledger rows of a wallet

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    handlers::AppState,
    models::{
        transaction::TransactionResponse,
        wallet::{ChargeResponse, ChargeWalletRequest, CreateWalletRequest, WalletResponse},
    },
    repository::{BalanceStore, LedgerStore},
};

/// Create a new wallet.
///
/// # Request Body
///
/// ```json
/// {
///   "name": "Sara",
///   "mobile": "09121234567",
///   "balance": 0
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: the created wallet
/// - **Error (400)**: malformed mobile or negative balance
/// - **Error (409)**: a wallet already exists for this mobile
pub async fn create_wallet<S, L>(
    State(state): State<AppState<S, L>>,
    Json(request): Json<CreateWalletRequest>,
) -> Result<(StatusCode, Json<WalletResponse>), AppError>
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    let wallet = state.wallets.create(request.into()).await?;
    Ok((StatusCode::CREATED, Json(wallet.into())))
}

pub async fn get_wallet<S, L>(
    State(state): State<AppState<S, L>>,
    Path(wallet_id): Path<Uuid>,
) -> Result<Json<WalletResponse>, AppError>
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    let wallet = state.wallets.get_by_id(wallet_id).await?;
    Ok(Json(wallet.into()))
}

pub async fn get_wallet_by_mobile<S, L>(
    State(state): State<AppState<S, L>>,
    Path(mobile): Path<String>,
) -> Result<Json<WalletResponse>, AppError>
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    let wallet = state.wallets.get_by_mobile(&mobile).await?;
    Ok(Json(wallet.into()))
}

/// Charge a wallet by mobile number.
///
/// # Request Body
///
/// ```json
/// { "mobile": "09121234567", "amount": 5000 }
/// ```
///
/// # Response (200)
///
/// ```json
/// {
///   "wallet_id": "550e8400-...",
///   "transaction_id": "770e8400-...",
///   "balance": 15000,
///   "opened": false
/// }
/// ```
pub async fn charge_wallet<S, L>(
    State(state): State<AppState<S, L>>,
    Json(request): Json<ChargeWalletRequest>,
) -> Result<Json<ChargeResponse>, AppError>
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    let receipt = state
        .wallets
        .charge_wallet(&request.mobile, request.amount)
        .await?;

    Ok(Json(ChargeResponse {
        wallet_id: receipt.wallet.id,
        transaction_id: receipt.transaction.id,
        balance: receipt.wallet.balance,
        opened: receipt.opened,
    }))
}

pub async fn list_wallet_transactions<S, L>(
    State(state): State<AppState<S, L>>,
    Path(wallet_id): Path<Uuid>,
) -> Result<Json<Vec<TransactionResponse>>, AppError>
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    let transactions = state.transactions.list_by_wallet(wallet_id).await?;
    Ok(Json(transactions.into_iter().map(Into::into).collect()))
}
