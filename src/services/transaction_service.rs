//! Transaction service - ledger reads and asynchronous transaction creation.
//!
//! Ledger rows are never written here. Producers publish a transaction-created
//! event and the subscriber records it through
//! [`WalletService::record_transaction`](crate::services::WalletService::record_transaction).

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::messaging::{CREATE_TRANSACTION_SUBJECT, EventPublisher};
use crate::models::event::TransactionCreatedEvent;
use crate::models::transaction::Transaction;
use crate::repository::{BalanceStore, LedgerStore};

pub struct TransactionService<S, L> {
    wallets: S,
    ledger: L,
    publisher: Arc<dyn EventPublisher>,
}

impl<S, L> TransactionService<S, L>
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    pub fn new(wallets: S, ledger: L, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            wallets,
            ledger,
            publisher,
        }
    }

    pub async fn get_by_id(&self, transaction_id: Uuid) -> Result<Transaction, AppError> {
        self.ledger.get_by_id(transaction_id).await
    }

    /// Ledger rows of one wallet, oldest first.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the wallet does not exist
    pub async fn list_by_wallet(&self, wallet_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        self.wallets.get_by_id(wallet_id).await?;
        self.ledger.list_by_wallet(wallet_id).await
    }

    /// Publish a transaction-created event for asynchronous recording.
    ///
    /// An event without an idempotency key gets a fresh one, so a producer
    /// retrying the same call is deduplicated by the broker and the ledger.
    /// Returns the key the event was published with.
    ///
    /// # Errors
    ///
    /// - `Validation`: zero amount
    /// - `NotFound`: the wallet does not exist
    /// - `Broker`: the bus did not accept the event
    pub async fn publish_create(&self, mut event: TransactionCreatedEvent) -> Result<String, AppError> {
        if event.amount == 0 {
            return Err(AppError::Validation("Amount must not be zero".to_string()));
        }
        self.wallets.get_by_id(event.wallet_id).await?;

        let key = match event.idempotency_key.take() {
            Some(key) if !key.trim().is_empty() => key,
            _ => Uuid::new_v4().to_string(),
        };
        event.idempotency_key = Some(key.clone());

        let payload =
            serde_json::to_vec(&event).map_err(|e| AppError::Broker(e.to_string()))?;
        self.publisher
            .publish(CREATE_TRANSACTION_SUBJECT, payload, Some(&key))
            .await?;

        info!(
            wallet_id = %event.wallet_id,
            amount = event.amount,
            kind = %event.kind,
            idempotency_key = %key,
            "transaction event published"
        );
        Ok(key)
    }
}
