//! Wallet service - charge workflow and wallet reads.
//!
//! This service handles:
//! - Charging a wallet by mobile number, opening it on first charge
//! - Explicit wallet creation
//! - Read-through cached lookups by id and by mobile
//! - The idempotent ledger-write path used by the event consumer
//!
//! # Atomicity Guarantees
//!
//! Every balance change and its ledger row are written inside one store
//! transaction. The balance is read with [`BalanceStore::lock_for_update`],
//! never from the cache, and the lock is held until commit.
//!
//! Cache refreshes and event publishing happen after commit and never fail
//! the operation. For charges they run on a background task tracked by the
//! service, so a slow broker cannot hold the caller past the commit.
//! [`WalletService::drain`] waits for those tasks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::WalletCache;
use crate::error::AppError;
use crate::messaging::{
    CREATE_TRANSACTION_SUBJECT, EventPublisher, LedgerWriter, RecordOutcome, RetryPolicy, retry,
};
use crate::metrics::{Metrics, counters};
use crate::models::event::TransactionCreatedEvent;
use crate::models::transaction::{NewTransaction, Transaction, TransactionType};
use crate::models::wallet::{NewWallet, Wallet};
use crate::repository::{BalanceStore, LedgerStore};
use crate::validation::{validate_mobile, validate_positive_amount};

/// Result of a successful charge.
#[derive(Debug, Clone)]
pub struct ChargeReceipt {
    /// Wallet snapshot as committed
    pub wallet: Wallet,

    /// The Charge row written with the balance change
    pub transaction: Transaction,

    /// True when this charge created the wallet
    pub opened: bool,
}

pub struct WalletService<S, L> {
    wallets: S,
    ledger: L,
    effects: CommitEffects,
    pending: TaskTracker,
}

/// Side effects of a committed write: cache refresh and event publishing.
#[derive(Clone)]
struct CommitEffects {
    cache: Arc<dyn WalletCache>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<dyn Metrics>,
    publish_retry: RetryPolicy,
}

impl<S, L> WalletService<S, L>
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    pub fn new(
        wallets: S,
        ledger: L,
        cache: Arc<dyn WalletCache>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<dyn Metrics>,
        publish_retry: RetryPolicy,
    ) -> Self {
        Self {
            wallets,
            ledger,
            effects: CommitEffects {
                cache,
                publisher,
                metrics,
                publish_retry,
            },
            pending: TaskTracker::new(),
        }
    }

    /// Wait until every post-commit task spawned so far has finished.
    pub async fn drain(&self) {
        self.pending.close();
        self.pending.wait().await;
        self.pending.reopen();
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.wallets.ping().await
    }

    /// Credit `amount` to the wallet registered for `mobile`.
    ///
    /// # Process
    ///
    /// 1. Resolve the wallet by mobile (cache, then store)
    /// 2. No wallet: create it with `amount` as opening balance and its Charge row
    /// 3. Wallet found: lock it, add `amount`, write the balance and a Charge row
    /// 4. Commit, or roll back everything on any failure
    /// 5. In the background: refresh both cache indices and publish the
    ///    transaction-created event
    ///
    /// # Errors
    ///
    /// - `Validation`: malformed mobile or non-positive amount
    /// - `TransientStore` / `Persistence`: the store failed, nothing was written
    pub async fn charge_wallet(&self, mobile: &str, amount: i64) -> Result<ChargeReceipt, AppError> {
        validate_mobile(mobile)?;
        validate_positive_amount(amount)?;

        match self.charge(mobile, amount).await {
            Ok(receipt) => {
                self.effects.metrics.increment_counter(counters::CHARGE_SUCCESS);
                info!(
                    wallet_id = %receipt.wallet.id,
                    amount,
                    balance = receipt.wallet.balance,
                    opened = receipt.opened,
                    "wallet charged"
                );
                Ok(receipt)
            }
            Err(e) => {
                self.effects.metrics.increment_counter(counters::CHARGE_ERROR);
                warn!(%mobile, amount, error = %e, "charge failed");
                Err(e)
            }
        }
    }

    async fn charge(&self, mobile: &str, amount: i64) -> Result<ChargeReceipt, AppError> {
        let receipt = match self.resolve_by_mobile(mobile).await? {
            Some(wallet) => self.credit(wallet.id, amount).await?,
            None => match self.open_with_charge(mobile, amount).await {
                Ok(receipt) => receipt,
                Err(AppError::WalletExists(_)) => {
                    // lost the race to open it, charge the winner's wallet
                    debug!(%mobile, "wallet opened concurrently");
                    let wallet = self.wallets.get_by_mobile(mobile).await?;
                    self.credit(wallet.id, amount).await?
                }
                Err(e) => return Err(e),
            },
        };

        let effects = self.effects.clone();
        let (wallet, transaction) = (receipt.wallet.clone(), receipt.transaction.clone());
        self.pending.spawn(async move {
            effects.refresh_cache(&wallet).await;
            effects.publish_committed(&transaction).await;
        });
        Ok(receipt)
    }

    /// Wallet for `mobile`, or `None` when nobody registered it yet.
    async fn resolve_by_mobile(&self, mobile: &str) -> Result<Option<Wallet>, AppError> {
        match self.effects.cache.get_by_mobile(mobile).await {
            Ok(Some(wallet)) => return Ok(Some(wallet)),
            Ok(None) => {}
            Err(e) => self.effects.cache_failed("get_by_mobile", &e),
        }

        match self.wallets.get_by_mobile(mobile).await {
            Ok(wallet) => {
                self.effects.refresh_cache(&wallet).await;
                Ok(Some(wallet))
            }
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn open_with_charge(&self, mobile: &str, amount: i64) -> Result<ChargeReceipt, AppError> {
        let mut tx = self.wallets.begin().await?;
        let opened = async {
            let wallet = self
                .wallets
                .create_in(&mut tx, NewWallet::opened_by_charge(mobile, amount))
                .await?;
            let transaction = self
                .ledger
                .append(&mut tx, NewTransaction::charge(wallet.id, amount))
                .await?;
            Ok::<_, AppError>((wallet, transaction))
        }
        .await;

        let (wallet, transaction) = self.finish(tx, opened).await?;
        Ok(ChargeReceipt {
            wallet,
            transaction,
            opened: true,
        })
    }

    async fn credit(&self, wallet_id: Uuid, amount: i64) -> Result<ChargeReceipt, AppError> {
        let mut tx = self.wallets.begin().await?;
        let credited = async {
            let locked = self.wallets.lock_for_update(&mut tx, wallet_id).await?;
            let balance = add_to_balance(locked.balance, amount)?;
            let wallet = self.wallets.update_balance(&mut tx, wallet_id, balance).await?;
            let transaction = self
                .ledger
                .append(&mut tx, NewTransaction::charge(wallet_id, amount))
                .await?;
            Ok::<_, AppError>((wallet, transaction))
        }
        .await;

        let (wallet, transaction) = self.finish(tx, credited).await?;
        Ok(ChargeReceipt {
            wallet,
            transaction,
            opened: false,
        })
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(&self, tx: S::Tx, result: Result<T, AppError>) -> Result<T, AppError> {
        match result {
            Ok(value) => {
                self.wallets.commit(tx).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.wallets.rollback(tx).await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Create a wallet. A positive opening balance is recorded as a Deposit row.
    pub async fn create(&self, wallet: NewWallet) -> Result<Wallet, AppError> {
        validate_mobile(&wallet.mobile)?;
        if wallet.balance < 0 {
            return Err(AppError::Validation(
                "Opening balance must not be negative".to_string(),
            ));
        }

        let opening_balance = wallet.balance;
        let mut tx = self.wallets.begin().await?;
        let created = async {
            let wallet = self.wallets.create_in(&mut tx, wallet).await?;
            if opening_balance > 0 {
                let deposit = NewTransaction {
                    wallet_id: wallet.id,
                    amount: opening_balance,
                    kind: TransactionType::Deposit,
                    idempotency_key: Uuid::new_v4().to_string(),
                };
                self.ledger.append(&mut tx, deposit).await?;
            }
            Ok::<_, AppError>(wallet)
        }
        .await;

        let wallet = self.finish(tx, created).await?;
        info!(wallet_id = %wallet.id, mobile = %wallet.mobile, "wallet created");
        self.effects.refresh_cache(&wallet).await;
        Ok(wallet)
    }

    pub async fn get_by_id(&self, wallet_id: Uuid) -> Result<Wallet, AppError> {
        match self.effects.cache.get_by_id(wallet_id).await {
            Ok(Some(wallet)) => return Ok(wallet),
            Ok(None) => {}
            Err(e) => self.effects.cache_failed("get_by_id", &e),
        }

        let wallet = self.wallets.get_by_id(wallet_id).await?;
        self.effects.refresh_cache(&wallet).await;
        Ok(wallet)
    }

    pub async fn get_by_mobile(&self, mobile: &str) -> Result<Wallet, AppError> {
        validate_mobile(mobile)?;
        self.resolve_by_mobile(mobile)
            .await?
            .ok_or(AppError::NotFound("wallet"))
    }

    /// Apply an event's amount to its wallet and append the ledger row, once
    /// per idempotency key.
    ///
    /// The wallet lock is taken before the key lookup, so two deliveries of
    /// the same event serialize and the second one sees the first one's row.
    pub async fn record_transaction(&self, entry: NewTransaction) -> Result<RecordOutcome, AppError> {
        if entry.amount == 0 {
            return Err(AppError::Validation("Amount must not be zero".to_string()));
        }
        if entry.idempotency_key.trim().is_empty() {
            return Err(AppError::Validation("Idempotency key is required".to_string()));
        }

        let key = entry.idempotency_key.clone();
        let mut tx = self.wallets.begin().await?;
        let applied = async {
            let locked = self.wallets.lock_for_update(&mut tx, entry.wallet_id).await?;
            if self.ledger.find_by_key_in(&mut tx, &key).await?.is_some() {
                return Ok(None);
            }
            let balance = add_to_balance(locked.balance, entry.amount)?;
            let wallet = self
                .wallets
                .update_balance(&mut tx, entry.wallet_id, balance)
                .await?;
            self.ledger.append(&mut tx, entry).await?;
            Ok::<_, AppError>(Some(wallet))
        }
        .await;

        match self.finish(tx, applied).await {
            Ok(Some(wallet)) => {
                self.effects.refresh_cache(&wallet).await;
                Ok(RecordOutcome::Recorded)
            }
            Ok(None) | Err(AppError::DuplicateTransaction(_)) => {
                debug!(idempotency_key = %key, "transaction already recorded");
                Ok(RecordOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }
}

impl CommitEffects {
    async fn refresh_cache(&self, wallet: &Wallet) {
        if let Err(e) = self.cache.set(wallet).await {
            self.cache_failed("set", &e);
        }
    }

    fn cache_failed(&self, op: &str, err: &AppError) {
        self.metrics.increment_counter(counters::CACHE_ERROR);
        warn!(op, error = %err, "wallet cache unavailable");
    }

    /// Announce a committed ledger row. Failures are counted and logged.
    async fn publish_committed(&self, transaction: &Transaction) {
        let event = TransactionCreatedEvent::from_committed(transaction);
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.increment_counter(counters::PUBLISH_ERROR);
                warn!(transaction_id = %transaction.id, error = %e, "failed to encode event");
                return;
            }
        };

        let key = transaction.idempotency_key.as_str();
        let published = retry(&self.publish_retry, &CancellationToken::new(), || {
            self.publisher
                .publish(CREATE_TRANSACTION_SUBJECT, payload.clone(), Some(key))
        })
        .await;

        if let Err(e) = published {
            self.metrics.increment_counter(counters::PUBLISH_ERROR);
            warn!(
                transaction_id = %transaction.id,
                wallet_id = %transaction.wallet_id,
                error = %e,
                "failed to publish transaction event"
            );
        }
    }
}

#[async_trait]
impl<S, L> LedgerWriter for WalletService<S, L>
where
    S: BalanceStore,
    L: LedgerStore<S::Tx>,
{
    async fn record(&self, entry: NewTransaction) -> Result<RecordOutcome, AppError> {
        self.record_transaction(entry).await
    }
}

fn add_to_balance(balance: i64, amount: i64) -> Result<i64, AppError> {
    let updated = balance
        .checked_add(amount)
        .ok_or_else(|| AppError::Validation("Balance overflow".to_string()))?;
    if updated < 0 {
        return Err(AppError::InsufficientBalance);
    }
    Ok(updated)
}
