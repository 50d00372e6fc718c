//! Wallet data models and API request/response types.
//!
//! This module defines:
//! - `Wallet`: Database entity holding the canonical balance
//! - `NewWallet`: Insert payload used by explicit and implicit wallet creation
//! - `CreateWalletRequest` / `ChargeWalletRequest`: Request bodies
//! - `WalletResponse` / `ChargeResponse`: Response bodies returned to clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a wallet record from the database.
///
/// # Database Table
///
/// Maps to the `wallets` table. Each wallet:
/// - Is addressed by `id` or by its unique `mobile` number
/// - Has a balance stored in minor currency units
///
/// The same struct is serialized into the cache, so it also derives `Deserialize`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique identifier for this wallet
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Alternate key. At most one wallet per mobile number.
    pub mobile: String,

    /// Current balance in minor units
    ///
    /// Must be >= 0 (enforced by database CHECK constraint).
    pub balance: i64,

    /// Avatar reference (URL or object key)
    pub avatar: Option<String>,

    pub description: String,

    pub created_at: DateTime<Utc>,

    /// Timestamp of last balance update
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when inserting a wallet. Timestamps and id are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewWallet {
    pub name: String,
    pub mobile: String,
    pub balance: i64,
    pub avatar: Option<String>,
    pub description: String,
}

impl NewWallet {
    /// Wallet opened implicitly by a first charge. Opening balance is the charge amount.
    pub fn opened_by_charge(mobile: &str, amount: i64) -> Self {
        Self {
            mobile: mobile.to_string(),
            balance: amount,
            ..Self::default()
        }
    }
}

/// Request body for creating a new wallet.
///
/// # JSON Example
///
/// ```json
/// {
///   "name": "Sara",
///   "mobile": "09121234567",
///   "balance": 0,
///   "avatar": "https://cdn.example.com/a.png",
///   "description": "Personal wallet"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    #[serde(default)]
    pub name: String,

    pub mobile: String,

    /// Opening balance in minor units (defaults to 0 if not provided)
    #[serde(default)]
    pub balance: i64,

    pub avatar: Option<String>,

    #[serde(default)]
    pub description: String,
}

impl From<CreateWalletRequest> for NewWallet {
    fn from(request: CreateWalletRequest) -> Self {
        Self {
            name: request.name,
            mobile: request.mobile,
            balance: request.balance,
            avatar: request.avatar,
            description: request.description,
        }
    }
}

/// Request to credit a wallet addressed by mobile number.
///
/// ```json
/// { "mobile": "09121234567", "amount": 5000 }
/// ```
#[derive(Debug, Deserialize)]
pub struct ChargeWalletRequest {
    pub mobile: String,

    /// Amount to add in minor units. Must be positive.
    pub amount: i64,
}

/// Response body for wallet endpoints.
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub id: Uuid,
    pub name: String,
    pub mobile: String,
    pub balance: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            id: wallet.id,
            name: wallet.name,
            mobile: wallet.mobile,
            balance: wallet.balance,
            avatar: wallet.avatar,
            description: wallet.description,
            created_at: wallet.created_at,
            updated_at: wallet.updated_at,
        }
    }
}

/// Result of a charge.
///
/// `opened` is true when the charge created the wallet.
#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    pub wallet_id: Uuid,
    pub transaction_id: Uuid,
    pub balance: i64,
    pub opened: bool,
}
