//! In-process balance and ledger store.
//!
//! Mirrors the Postgres contract closely enough to run the charge workflow and
//! the subscriber without a database:
//!
//! - `lock_for_update` takes a per-wallet async mutex that stays held until the
//!   transaction handle is committed, rolled back or dropped
//! - writes are staged on the [`MemoryTx`] and applied under one state lock at
//!   commit, so readers never see a balance without its ledger row
//! - wallet mobile numbers and ledger idempotency keys are unique
//! - balances may not go negative
//!
//! Faults can be injected into ledger appends and balance writes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::transaction::{NewTransaction, Transaction};
use crate::models::wallet::{NewWallet, Wallet};
use crate::repository::{BalanceStore, LedgerStore};

/// Failure flavour for injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    Persistent,
}

impl Fault {
    fn into_error(self, op: &str) -> AppError {
        match self {
            Fault::Transient => AppError::TransientStore(format!("injected fault in {op}")),
            Fault::Persistent => AppError::Persistence(format!("injected fault in {op}")),
        }
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    appends: u32,
    append_fault: Option<Fault>,
    balance_writes: u32,
}

#[derive(Default)]
struct State {
    wallets: HashMap<Uuid, Wallet>,
    mobiles: HashMap<String, Uuid>,
    ledger: Vec<Transaction>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    // one entry per wallet ever locked, never pruned; fine for an in-process store
    row_locks: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,
    faults: Mutex<FaultPlan>,
    lookups: AtomicUsize,
}

/// Staged writes and held row locks of one open transaction.
#[derive(Default)]
pub struct MemoryTx {
    created: Vec<Wallet>,
    balances: HashMap<Uuid, i64>,
    entries: Vec<Transaction>,
    locked: HashSet<Uuid>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl MemoryTx {
    fn staged_wallet(&self, wallet_id: Uuid) -> Option<&Wallet> {
        self.created.iter().find(|w| w.id == wallet_id)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` ledger appends.
    pub fn fail_next_appends(&self, count: u32, fault: Fault) {
        let mut plan = self.inner.faults.lock();
        plan.appends = count;
        plan.append_fault = Some(fault);
    }

    /// Fail every ledger append until [`Self::clear_faults`].
    pub fn fail_all_appends(&self, fault: Fault) {
        self.fail_next_appends(u32::MAX, fault);
    }

    pub fn fail_next_balance_writes(&self, count: u32) {
        self.inner.faults.lock().balance_writes = count;
    }

    pub fn clear_faults(&self) {
        *self.inner.faults.lock() = FaultPlan::default();
    }

    /// Number of `get_by_id`/`get_by_mobile` calls served so far.
    pub fn lookups(&self) -> usize {
        self.inner.lookups.load(Ordering::SeqCst)
    }

    /// Committed balance, bypassing lookup accounting.
    pub fn balance_of(&self, wallet_id: Uuid) -> Option<i64> {
        self.inner.state.lock().wallets.get(&wallet_id).map(|w| w.balance)
    }

    pub fn ledger_len(&self) -> usize {
        self.inner.state.lock().ledger.len()
    }

    fn take_append_fault(&self) -> Option<Fault> {
        let mut plan = self.inner.faults.lock();
        if plan.appends == 0 {
            return None;
        }
        if plan.appends != u32::MAX {
            plan.appends -= 1;
        }
        plan.append_fault
    }

    fn take_balance_write_fault(&self) -> bool {
        let mut plan = self.inner.faults.lock();
        if plan.balance_writes == 0 {
            return false;
        }
        plan.balance_writes -= 1;
        true
    }

    fn row_lock(&self, wallet_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.inner.row_locks.entry(wallet_id).or_default().clone()
    }

    /// Wallet as seen from inside `tx`: staged creation and balance win over committed state.
    fn view(&self, tx: &MemoryTx, wallet_id: Uuid) -> Option<Wallet> {
        let mut wallet = match tx.staged_wallet(wallet_id) {
            Some(w) => w.clone(),
            None => self.inner.state.lock().wallets.get(&wallet_id)?.clone(),
        };
        if let Some(balance) = tx.balances.get(&wallet_id) {
            wallet.balance = *balance;
        }
        Some(wallet)
    }

    fn new_wallet(wallet: NewWallet) -> Result<Wallet, AppError> {
        if wallet.balance < 0 {
            return Err(AppError::InsufficientBalance);
        }
        let now = Utc::now();
        Ok(Wallet {
            id: Uuid::new_v4(),
            name: wallet.name,
            mobile: wallet.mobile,
            balance: wallet.balance,
            avatar: wallet.avatar,
            description: wallet.description,
            created_at: now,
            updated_at: now,
        })
    }
}

#[async_trait]
impl BalanceStore for MemoryStore {
    type Tx = MemoryTx;

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn begin(&self) -> Result<MemoryTx, AppError> {
        Ok(MemoryTx::default())
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), AppError> {
        let mut state = self.inner.state.lock();

        for wallet in &tx.created {
            if state.mobiles.contains_key(&wallet.mobile) {
                return Err(AppError::WalletExists(wallet.mobile.clone()));
            }
        }
        for entry in &tx.entries {
            if state.ledger.iter().any(|t| t.idempotency_key == entry.idempotency_key) {
                return Err(AppError::DuplicateTransaction(entry.idempotency_key.clone()));
            }
        }

        let now = Utc::now();
        for wallet in tx.created.iter().cloned() {
            state.mobiles.insert(wallet.mobile.clone(), wallet.id);
            state.wallets.insert(wallet.id, wallet);
        }
        for (wallet_id, balance) in &tx.balances {
            if let Some(wallet) = state.wallets.get_mut(wallet_id) {
                wallet.balance = *balance;
                wallet.updated_at = now;
            }
        }
        state.ledger.extend(tx.entries.iter().cloned());

        // row locks are released when `tx` drops, after the state is published
        drop(state);
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<(), AppError> {
        drop(tx);
        Ok(())
    }

    async fn create(&self, wallet: NewWallet) -> Result<Wallet, AppError> {
        let wallet = Self::new_wallet(wallet)?;
        let mut state = self.inner.state.lock();
        if state.mobiles.contains_key(&wallet.mobile) {
            return Err(AppError::WalletExists(wallet.mobile));
        }
        state.mobiles.insert(wallet.mobile.clone(), wallet.id);
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn create_in(&self, tx: &mut MemoryTx, wallet: NewWallet) -> Result<Wallet, AppError> {
        let wallet = Self::new_wallet(wallet)?;
        let taken = self.inner.state.lock().mobiles.contains_key(&wallet.mobile)
            || tx.created.iter().any(|w| w.mobile == wallet.mobile);
        if taken {
            return Err(AppError::WalletExists(wallet.mobile));
        }
        tx.locked.insert(wallet.id);
        tx.created.push(wallet.clone());
        Ok(wallet)
    }

    async fn get_by_id(&self, wallet_id: Uuid) -> Result<Wallet, AppError> {
        self.inner.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner
            .state
            .lock()
            .wallets
            .get(&wallet_id)
            .cloned()
            .ok_or(AppError::NotFound("wallet"))
    }

    async fn get_by_mobile(&self, mobile: &str) -> Result<Wallet, AppError> {
        self.inner.lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.inner.state.lock();
        state
            .mobiles
            .get(mobile)
            .and_then(|id| state.wallets.get(id))
            .cloned()
            .ok_or(AppError::NotFound("wallet"))
    }

    async fn lock_for_update(&self, tx: &mut MemoryTx, wallet_id: Uuid) -> Result<Wallet, AppError> {
        if !tx.locked.contains(&wallet_id) {
            let guard = self.row_lock(wallet_id).lock_owned().await;
            tx.guards.push(guard);
            tx.locked.insert(wallet_id);
        }
        self.view(tx, wallet_id).ok_or(AppError::NotFound("wallet"))
    }

    async fn update_balance(
        &self,
        tx: &mut MemoryTx,
        wallet_id: Uuid,
        balance: i64,
    ) -> Result<Wallet, AppError> {
        if self.take_balance_write_fault() {
            return Err(Fault::Persistent.into_error("update_balance"));
        }
        if !tx.locked.contains(&wallet_id) {
            return Err(AppError::Persistence(format!(
                "wallet {wallet_id} updated without holding its lock"
            )));
        }
        if balance < 0 {
            return Err(AppError::InsufficientBalance);
        }

        let mut wallet = self.view(tx, wallet_id).ok_or(AppError::NotFound("wallet"))?;
        tx.balances.insert(wallet_id, balance);
        wallet.balance = balance;
        wallet.updated_at = Utc::now();
        Ok(wallet)
    }
}

#[async_trait]
impl LedgerStore<MemoryTx> for MemoryStore {
    async fn append(&self, tx: &mut MemoryTx, entry: NewTransaction) -> Result<Transaction, AppError> {
        if let Some(fault) = self.take_append_fault() {
            return Err(fault.into_error("append"));
        }
        if self.view(tx, entry.wallet_id).is_none() {
            return Err(AppError::Persistence(format!(
                "transactions.wallet_id references missing wallet {}",
                entry.wallet_id
            )));
        }

        let duplicate = tx.entries.iter().any(|t| t.idempotency_key == entry.idempotency_key)
            || self
                .inner
                .state
                .lock()
                .ledger
                .iter()
                .any(|t| t.idempotency_key == entry.idempotency_key);
        if duplicate {
            return Err(AppError::DuplicateTransaction(entry.idempotency_key));
        }

        let transaction = Transaction {
            id: Uuid::new_v4(),
            wallet_id: entry.wallet_id,
            amount: entry.amount,
            kind: entry.kind,
            idempotency_key: entry.idempotency_key,
            created_at: Utc::now(),
        };
        tx.entries.push(transaction.clone());
        Ok(transaction)
    }

    async fn find_by_key_in(
        &self,
        tx: &mut MemoryTx,
        key: &str,
    ) -> Result<Option<Transaction>, AppError> {
        if let Some(staged) = tx.entries.iter().find(|t| t.idempotency_key == key) {
            return Ok(Some(staged.clone()));
        }
        Ok(self
            .inner
            .state
            .lock()
            .ledger
            .iter()
            .find(|t| t.idempotency_key == key)
            .cloned())
    }

    async fn get_by_id(&self, transaction_id: Uuid) -> Result<Transaction, AppError> {
        self.inner
            .state
            .lock()
            .ledger
            .iter()
            .find(|t| t.id == transaction_id)
            .cloned()
            .ok_or(AppError::NotFound("transaction"))
    }

    async fn list_by_wallet(&self, wallet_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        Ok(self
            .inner
            .state
            .lock()
            .ledger
            .iter()
            .filter(|t| t.wallet_id == wallet_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transaction::TransactionType;

    fn new_wallet(mobile: &str, balance: i64) -> NewWallet {
        NewWallet {
            mobile: mobile.to_string(),
            balance,
            ..NewWallet::default()
        }
    }

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let store = MemoryStore::new();
        let wallet = store.create(new_wallet("09120000001", 100)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        store.lock_for_update(&mut tx, wallet.id).await.unwrap();
        store.update_balance(&mut tx, wallet.id, 150).await.unwrap();
        store
            .append(&mut tx, NewTransaction::charge(wallet.id, 50))
            .await
            .unwrap();

        assert_eq!(store.balance_of(wallet.id), Some(100));
        assert_eq!(store.ledger_len(), 0);

        store.commit(tx).await.unwrap();
        assert_eq!(store.balance_of(wallet.id), Some(150));
        assert_eq!(store.ledger_len(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = MemoryStore::new();
        let wallet = store.create(new_wallet("09120000002", 10)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        store.lock_for_update(&mut tx, wallet.id).await.unwrap();
        store.update_balance(&mut tx, wallet.id, 99).await.unwrap();
        store.rollback(tx).await.unwrap();

        assert_eq!(store.balance_of(wallet.id), Some(10));
    }

    #[tokio::test]
    async fn update_without_lock_is_rejected() {
        let store = MemoryStore::new();
        let wallet = store.create(new_wallet("09120000003", 10)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = store.update_balance(&mut tx, wallet.id, 20).await.unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
    }

    #[tokio::test]
    async fn lock_is_held_until_transaction_ends() {
        let store = MemoryStore::new();
        let wallet = store.create(new_wallet("09120000004", 10)).await.unwrap();

        let mut first = store.begin().await.unwrap();
        store.lock_for_update(&mut first, wallet.id).await.unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut second = store.begin().await.unwrap();
                store.lock_for_update(&mut second, wallet.id).await.unwrap()
            })
        };

        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        store.update_balance(&mut first, wallet.id, 11).await.unwrap();
        store.commit(first).await.unwrap();

        let seen = contender.await.unwrap();
        assert_eq!(seen.balance, 11);
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected() {
        let store = MemoryStore::new();
        let wallet = store.create(new_wallet("09120000005", 0)).await.unwrap();
        let entry = NewTransaction {
            wallet_id: wallet.id,
            amount: 5,
            kind: TransactionType::Deposit,
            idempotency_key: "dup".into(),
        };

        let mut tx = store.begin().await.unwrap();
        store.append(&mut tx, entry.clone()).await.unwrap();
        store.commit(tx).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = store.append(&mut tx, entry).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateTransaction(key) if key == "dup"));
    }

    #[tokio::test]
    async fn mobile_is_unique() {
        let store = MemoryStore::new();
        store.create(new_wallet("09120000006", 0)).await.unwrap();
        let err = store.create(new_wallet("09120000006", 0)).await.unwrap_err();
        assert!(matches!(err, AppError::WalletExists(_)));
    }
}
