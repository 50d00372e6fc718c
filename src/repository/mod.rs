//! Balance and ledger stores.
//!
//! Both stores bind their writes to one caller-supplied transaction handle
//! (`Tx`). Whoever calls [`BalanceStore::begin`] owns the handle and must end
//! it with exactly one [`BalanceStore::commit`] or [`BalanceStore::rollback`].
//! Dropping a handle without either rolls it back.
//!
//! Operations without a `tx` argument run in a transaction of their own.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::transaction::{NewTransaction, Transaction};
use crate::models::wallet::{NewWallet, Wallet};

pub mod memory;
pub mod transaction_pg;
pub mod wallet_pg;

pub use memory::{MemoryStore, MemoryTx};
pub use transaction_pg::PgTransactionRepository;
pub use wallet_pg::PgWalletRepository;

/// Canonical wallet balances and the transaction lifecycle.
#[async_trait]
pub trait BalanceStore: Send + Sync + 'static {
    type Tx: Send + 'static;

    /// Round-trip to the backing store. Used by the health endpoint.
    async fn ping(&self) -> Result<(), AppError>;

    async fn begin(&self) -> Result<Self::Tx, AppError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), AppError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), AppError>;

    /// Insert a wallet in its own transaction.
    async fn create(&self, wallet: NewWallet) -> Result<Wallet, AppError>;

    /// Insert a wallet inside `tx`. Visible to others only after commit.
    async fn create_in(&self, tx: &mut Self::Tx, wallet: NewWallet) -> Result<Wallet, AppError>;

    async fn get_by_id(&self, wallet_id: Uuid) -> Result<Wallet, AppError>;

    async fn get_by_mobile(&self, mobile: &str) -> Result<Wallet, AppError>;

    /// Read the wallet and hold an exclusive lock on it until `tx` ends.
    ///
    /// This is the only read the balance-mutation path may base a write on.
    async fn lock_for_update(&self, tx: &mut Self::Tx, wallet_id: Uuid) -> Result<Wallet, AppError>;

    /// Overwrite the balance of a wallet previously locked in `tx`.
    async fn update_balance(
        &self,
        tx: &mut Self::Tx,
        wallet_id: Uuid,
        balance: i64,
    ) -> Result<Wallet, AppError>;
}

/// Append-only ledger whose writes join a [`BalanceStore`] transaction.
#[async_trait]
pub trait LedgerStore<Tx: Send + 'static>: Send + Sync + 'static {
    /// Append a row inside `tx`. A reused idempotency key fails with
    /// [`AppError::DuplicateTransaction`].
    async fn append(&self, tx: &mut Tx, entry: NewTransaction) -> Result<Transaction, AppError>;

    /// Row carrying `key`, as seen from inside `tx`.
    async fn find_by_key_in(&self, tx: &mut Tx, key: &str) -> Result<Option<Transaction>, AppError>;

    async fn get_by_id(&self, transaction_id: Uuid) -> Result<Transaction, AppError>;

    /// All rows for a wallet, oldest first.
    async fn list_by_wallet(&self, wallet_id: Uuid) -> Result<Vec<Transaction>, AppError>;
}
