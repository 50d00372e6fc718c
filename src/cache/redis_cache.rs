//! Redis-backed wallet cache.
//!
//! Each index key holds the JSON-serialized wallet with a fixed expiry. Both
//! keys are written in one `MULTI`/`EXEC` pipeline so the id and mobile
//! indices never disagree after a refresh.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::cache::{WalletCache, id_key, mobile_key};
use crate::error::AppError;
use crate::models::wallet::Wallet;

#[derive(Clone)]
pub struct RedisWalletCache {
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl RedisWalletCache {
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, AppError> {
        let client = redis::Client::open(url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self::new(redis, ttl))
    }

    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self {
            redis,
            ttl_secs: ttl.as_secs().max(1),
        }
    }

    async fn get_json(&self, key: &str) -> Result<Option<Wallet>, AppError> {
        let cached: Option<String> = self.redis.clone().get(key).await?;
        match cached {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| AppError::Cache(format!("corrupt cache entry {key}: {e}"))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl WalletCache for RedisWalletCache {
    async fn get_by_id(&self, wallet_id: Uuid) -> Result<Option<Wallet>, AppError> {
        self.get_json(&id_key(wallet_id)).await
    }

    async fn get_by_mobile(&self, mobile: &str) -> Result<Option<Wallet>, AppError> {
        self.get_json(&mobile_key(mobile)).await
    }

    async fn set(&self, wallet: &Wallet) -> Result<(), AppError> {
        let json = serde_json::to_string(wallet)
            .map_err(|e| AppError::Cache(format!("serialize wallet: {e}")))?;

        redis::pipe()
            .atomic()
            .set_ex(id_key(wallet.id), &json, self.ttl_secs)
            .ignore()
            .set_ex(mobile_key(&wallet.mobile), &json, self.ttl_secs)
            .ignore()
            .query_async::<_, ()>(&mut self.redis.clone())
            .await?;

        Ok(())
    }
}
