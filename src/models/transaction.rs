//! Ledger entry models and API response types.
//!
//! This module defines:
//! - `TransactionType`: the closed set of ledger entry kinds
//! - `Transaction`: an immutable ledger row
//! - `NewTransaction`: insert payload bound to a balance mutation
//! - `TransactionResponse`: response body returned to clients

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a ledger entry.
///
/// Stored as its variant name in the `transactions.type` column and carried
/// the same way in event payloads. Parsing is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum TransactionType {
    Income,
    Expense,
    Transfer,
    Deposit,
    Withdrawal,
    Refund,
    Payment,
    Conversion,
    Interest,
    Adjustment,
    Charge,
}

impl TransactionType {
    pub const ALL: [TransactionType; 11] = [
        TransactionType::Income,
        TransactionType::Expense,
        TransactionType::Transfer,
        TransactionType::Deposit,
        TransactionType::Withdrawal,
        TransactionType::Refund,
        TransactionType::Payment,
        TransactionType::Conversion,
        TransactionType::Interest,
        TransactionType::Adjustment,
        TransactionType::Charge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "Income",
            TransactionType::Expense => "Expense",
            TransactionType::Transfer => "Transfer",
            TransactionType::Deposit => "Deposit",
            TransactionType::Withdrawal => "Withdrawal",
            TransactionType::Refund => "Refund",
            TransactionType::Payment => "Payment",
            TransactionType::Conversion => "Conversion",
            TransactionType::Interest => "Interest",
            TransactionType::Adjustment => "Adjustment",
            TransactionType::Charge => "Charge",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown transaction type: {0}")]
pub struct UnknownTransactionType(pub String);

impl FromStr for TransactionType {
    type Err = UnknownTransactionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownTransactionType(s.to_string()))
    }
}

impl TryFrom<String> for TransactionType {
    type Error = UnknownTransactionType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Represents a ledger row from the database.
///
/// # Database Table
///
/// Maps to the `transactions` table. Each row:
/// - References exactly one wallet
/// - Is written in the same database transaction as the balance change it records
/// - Is never updated or deleted
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct Transaction {
    pub id: Uuid,

    pub wallet_id: Uuid,

    /// Signed amount in minor units
    pub amount: i64,

    #[sqlx(rename = "type", try_from = "String")]
    #[serde(rename = "type")]
    pub kind: TransactionType,

    /// Unique per logical event. A second insert with the same key is rejected.
    pub idempotency_key: String,

    pub created_at: DateTime<Utc>,
}

/// Ledger row to append alongside a balance mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub wallet_id: Uuid,
    pub amount: i64,
    pub kind: TransactionType,
    pub idempotency_key: String,
}

impl NewTransaction {
    /// Ledger row for a synchronous charge. The key is fresh for every call.
    pub fn charge(wallet_id: Uuid, amount: i64) -> Self {
        Self {
            wallet_id,
            amount,
            kind: TransactionType::Charge,
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }
}

/// Response returned for transaction reads.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub amount: i64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub created_at: DateTime<Utc>,
}

/// Drops the idempotency key, which is internal bookkeeping.
impl From<Transaction> for TransactionResponse {
    fn from(transaction: Transaction) -> Self {
        Self {
            id: transaction.id,
            wallet_id: transaction.wallet_id,
            amount: transaction.amount,
            kind: transaction.kind,
            created_at: transaction.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_kind_case_insensitively() {
        for kind in TransactionType::ALL {
            assert_eq!(kind.as_str().parse::<TransactionType>().unwrap(), kind);
            assert_eq!(
                kind.as_str().to_uppercase().parse::<TransactionType>().unwrap(),
                kind
            );
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = "Bonus".parse::<TransactionType>().unwrap_err();
        assert_eq!(err.to_string(), "unknown transaction type: Bonus");
    }

    #[test]
    fn serializes_as_variant_name() {
        let json = serde_json::to_string(&TransactionType::Charge).unwrap();
        assert_eq!(json, "\"Charge\"");
        let back: TransactionType = serde_json::from_str("\"withdrawal\"").unwrap();
        assert_eq!(back, TransactionType::Withdrawal);
    }

    #[test]
    fn charge_rows_get_distinct_keys() {
        let wallet_id = Uuid::new_v4();
        let a = NewTransaction::charge(wallet_id, 10);
        let b = NewTransaction::charge(wallet_id, 10);
        assert_eq!(a.kind, TransactionType::Charge);
        assert_ne!(a.idempotency_key, b.idempotency_key);
    }
}
