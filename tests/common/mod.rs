#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use wallet_service::cache::MemoryWalletCache;
use wallet_service::error::AppError;
use wallet_service::messaging::{
    Delivery, RecordingPublisher, RetryPolicy, SubscriberSettings, TransactionSubscriber,
};
use wallet_service::metrics::RecordingMetrics;
use wallet_service::models::wallet::{NewWallet, Wallet};
use wallet_service::repository::{BalanceStore, MemoryStore};
use wallet_service::services::{TransactionService, WalletService};

pub type MemoryWalletService = WalletService<MemoryStore, MemoryStore>;

pub fn no_delay() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        delay: Duration::ZERO,
    }
}

/// Services wired to in-process adapters.
pub struct Harness {
    pub store: MemoryStore,
    pub cache: Arc<MemoryWalletCache>,
    pub publisher: Arc<RecordingPublisher>,
    pub metrics: Arc<RecordingMetrics>,
    pub wallets: Arc<MemoryWalletService>,
    pub transactions: Arc<TransactionService<MemoryStore, MemoryStore>>,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let cache = Arc::new(MemoryWalletCache::new(Duration::from_secs(3600)));
        let publisher = Arc::new(RecordingPublisher::new());
        let metrics = Arc::new(RecordingMetrics::new());

        let wallets = Arc::new(WalletService::new(
            store.clone(),
            store.clone(),
            cache.clone(),
            publisher.clone(),
            metrics.clone(),
            no_delay(),
        ));
        let transactions = Arc::new(TransactionService::new(
            store.clone(),
            store.clone(),
            publisher.clone(),
        ));

        Self {
            store,
            cache,
            publisher,
            metrics,
            wallets,
            transactions,
        }
    }

    /// Insert a wallet straight into the store, bypassing cache and ledger.
    pub async fn seed_wallet(&self, mobile: &str, balance: i64) -> Wallet {
        self.store
            .create(NewWallet {
                name: "seed".to_string(),
                mobile: mobile.to_string(),
                balance,
                ..NewWallet::default()
            })
            .await
            .expect("seed wallet")
    }

    pub fn subscriber(&self, max_redelivery: u64) -> TransactionSubscriber {
        TransactionSubscriber::new(
            self.wallets.clone(),
            self.publisher.clone(),
            self.metrics.clone(),
            SubscriberSettings {
                max_redelivery,
                retry: no_delay(),
                ..SubscriberSettings::default()
            },
        )
    }
}

/// A broker message with observable ack/term calls.
pub struct TestDelivery {
    pub subject: String,
    pub payload: Vec<u8>,
    pub sequence: u64,
    pub redelivery_count: u64,
    pub timestamp: i64,
    acked: AtomicBool,
    termed: AtomicBool,
}

impl TestDelivery {
    pub fn new(payload: impl Into<Vec<u8>>, sequence: u64, redelivery_count: u64) -> Self {
        Self {
            subject: "transaction:create".to_string(),
            payload: payload.into(),
            sequence,
            redelivery_count,
            timestamp: 1_700_000_000_000_000_000,
            acked: AtomicBool::new(false),
            termed: AtomicBool::new(false),
        }
    }

    pub fn acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn termed(&self) -> bool {
        self.termed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Delivery for TestDelivery {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn redelivery_count(&self) -> u64 {
        self.redelivery_count
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    async fn ack(&self) -> Result<(), AppError> {
        self.acked.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn term(&self) -> Result<(), AppError> {
        self.termed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
