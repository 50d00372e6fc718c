//! PostgreSQL ledger repository.
//!
//! Rows are only ever inserted. The unique constraint on `idempotency_key`
//! turns a second insert of the same logical event into
//! [`AppError::DuplicateTransaction`].

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::{DbPool, PgTx};
use crate::error::AppError;
use crate::models::transaction::{NewTransaction, Transaction};
use crate::repository::LedgerStore;

const TRANSACTION_COLUMNS: &str = "id, wallet_id, amount, type, idempotency_key, created_at";

#[derive(Clone)]
pub struct PgTransactionRepository {
    pool: DbPool,
}

impl PgTransactionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore<PgTx> for PgTransactionRepository {
    async fn append(&self, tx: &mut PgTx, entry: NewTransaction) -> Result<Transaction, AppError> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            INSERT INTO transactions (wallet_id, amount, type, idempotency_key)
            VALUES ($1, $2, $3, $4)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(entry.wallet_id)
        .bind(entry.amount)
        .bind(entry.kind.as_str())
        .bind(&entry.idempotency_key)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::DuplicateTransaction(_) => {
                AppError::DuplicateTransaction(entry.idempotency_key.clone())
            }
            other => other,
        })
    }

    async fn find_by_key_in(
        &self,
        tx: &mut PgTx,
        key: &str,
    ) -> Result<Option<Transaction>, AppError> {
        Ok(sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?)
    }

    async fn get_by_id(&self, transaction_id: Uuid) -> Result<Transaction, AppError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("transaction"))
    }

    async fn list_by_wallet(&self, wallet_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        Ok(sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE wallet_id = $1
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?)
    }
}
