//! Best-effort wallet cache.
//!
//! The cache is dual-indexed (`id:<wallet_id>` and `mobile:<mobile>`) and is a
//! possibly-stale shadow of the balance store. It is never consulted inside a
//! locked balance mutation. Callers treat every error from it as a miss.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::wallet::Wallet;

pub mod redis_cache;

pub use redis_cache::RedisWalletCache;

pub fn id_key(wallet_id: Uuid) -> String {
    format!("id:{wallet_id}")
}

pub fn mobile_key(mobile: &str) -> String {
    format!("mobile:{mobile}")
}

#[async_trait]
pub trait WalletCache: Send + Sync {
    async fn get_by_id(&self, wallet_id: Uuid) -> Result<Option<Wallet>, AppError>;

    async fn get_by_mobile(&self, mobile: &str) -> Result<Option<Wallet>, AppError>;

    /// Refresh both indices with one snapshot.
    async fn set(&self, wallet: &Wallet) -> Result<(), AppError>;
}

/// Process-local cache with the same keys and expiry semantics as Redis.
pub struct MemoryWalletCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Wallet, Instant)>>,
    failing: AtomicBool,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl MemoryWalletCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Make every call fail, as if the backend were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Cache("cache backend unavailable".to_string()));
        }
        Ok(())
    }

    fn lookup(&self, key: &str) -> Result<Option<Wallet>, AppError> {
        self.check()?;
        let mut entries = self.entries.lock();
        let found = match entries.get(key) {
            Some((wallet, expires_at)) if *expires_at > Instant::now() => Some(wallet.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::SeqCst),
            None => self.misses.fetch_add(1, Ordering::SeqCst),
        };
        Ok(found)
    }
}

#[async_trait]
impl WalletCache for MemoryWalletCache {
    async fn get_by_id(&self, wallet_id: Uuid) -> Result<Option<Wallet>, AppError> {
        self.lookup(&id_key(wallet_id))
    }

    async fn get_by_mobile(&self, mobile: &str) -> Result<Option<Wallet>, AppError> {
        self.lookup(&mobile_key(mobile))
    }

    async fn set(&self, wallet: &Wallet) -> Result<(), AppError> {
        self.check()?;
        let expires_at = Instant::now() + self.ttl;
        let mut entries = self.entries.lock();
        entries.insert(id_key(wallet.id), (wallet.clone(), expires_at));
        entries.insert(mobile_key(&wallet.mobile), (wallet.clone(), expires_at));
        Ok(())
    }
}
