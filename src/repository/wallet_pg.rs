//! PostgreSQL wallet repository.
//!
//! # Locking
//!
//! `lock_for_update` issues `SELECT ... FOR UPDATE`. The row lock is held
//! until the surrounding transaction commits or rolls back, so two charges
//! for the same wallet serialize at the database, across every replica.

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::{DbPool, PgTx};
use crate::error::AppError;
use crate::models::wallet::{NewWallet, Wallet};
use crate::repository::BalanceStore;

const WALLET_COLUMNS: &str =
    "id, name, mobile, balance, avatar, description, created_at, updated_at";

#[derive(Clone)]
pub struct PgWalletRepository {
    pool: DbPool,
}

impl PgWalletRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Map driver errors, naming the wallet entity and the conflicting mobile.
fn wallet_error(err: sqlx::Error, mobile: Option<&str>) -> AppError {
    match AppError::from(err) {
        AppError::NotFound(_) => AppError::NotFound("wallet"),
        AppError::WalletExists(_) => AppError::WalletExists(mobile.unwrap_or_default().to_string()),
        other => other,
    }
}

fn insert_query() -> String {
    format!(
        r#"
        INSERT INTO wallets (name, mobile, balance, avatar, description)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {WALLET_COLUMNS}
        "#
    )
}

#[async_trait]
impl BalanceStore for PgWalletRepository {
    type Tx = PgTx;

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<PgTx, AppError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: PgTx) -> Result<(), AppError> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: PgTx) -> Result<(), AppError> {
        Ok(tx.rollback().await?)
    }

    async fn create(&self, wallet: NewWallet) -> Result<Wallet, AppError> {
        sqlx::query_as::<_, Wallet>(&insert_query())
            .bind(&wallet.name)
            .bind(&wallet.mobile)
            .bind(wallet.balance)
            .bind(&wallet.avatar)
            .bind(&wallet.description)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| wallet_error(e, Some(&wallet.mobile)))
    }

    async fn create_in(&self, tx: &mut PgTx, wallet: NewWallet) -> Result<Wallet, AppError> {
        sqlx::query_as::<_, Wallet>(&insert_query())
            .bind(&wallet.name)
            .bind(&wallet.mobile)
            .bind(wallet.balance)
            .bind(&wallet.avatar)
            .bind(&wallet.description)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| wallet_error(e, Some(&wallet.mobile)))
    }

    async fn get_by_id(&self, wallet_id: Uuid) -> Result<Wallet, AppError> {
        sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1"
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("wallet"))
    }

    async fn get_by_mobile(&self, mobile: &str) -> Result<Wallet, AppError> {
        sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE mobile = $1"
        ))
        .bind(mobile)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("wallet"))
    }

    async fn lock_for_update(&self, tx: &mut PgTx, wallet_id: Uuid) -> Result<Wallet, AppError> {
        // FOR UPDATE blocks concurrent lockers of this row until we commit
        sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1 FOR UPDATE"
        ))
        .bind(wallet_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::NotFound("wallet"))
    }

    async fn update_balance(
        &self,
        tx: &mut PgTx,
        wallet_id: Uuid,
        balance: i64,
    ) -> Result<Wallet, AppError> {
        sqlx::query_as::<_, Wallet>(&format!(
            r#"
            UPDATE wallets
            SET balance = $1,
                updated_at = NOW()
            WHERE id = $2
            RETURNING {WALLET_COLUMNS}
            "#
        ))
        .bind(balance)
        .bind(wallet_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::NotFound("wallet"))
    }
}
