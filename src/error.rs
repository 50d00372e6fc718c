//! Error types and HTTP error response handling.
//!
//! This module defines every error the wallet service can raise and how they
//! are converted into HTTP responses with appropriate status codes and JSON bodies.
//!
//! Store errors are classified at the boundary (`From<sqlx::Error>`) so the
//! charge workflow and the event consumer can branch on retryability without
//! knowing which database driver produced the failure.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Constraint names declared in `migrations/`. Unique and check violations are
/// mapped to domain errors by name.
pub const WALLET_MOBILE_CONSTRAINT: &str = "wallets_mobile_unique";
pub const WALLET_BALANCE_CONSTRAINT: &str = "wallets_balance_non_negative";
pub const TRANSACTION_KEY_CONSTRAINT: &str = "transactions_idempotency_key_unique";

/// Application-wide error type.
///
/// # Error Categories
///
/// - **NotFound**: no wallet/transaction for the given key. Callers may branch on it.
/// - **Validation**: malformed input, rejected before any side effect
/// - **TransientStore**: network failure or lock contention, retryable
/// - **Persistence**: non-retryable store fault
/// - **MessageDecode**: poison payload, never retried
/// - **DeliveryExhausted**: retries exhausted and the redelivery threshold crossed
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No record exists for the given key. The payload names the entity.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Request body, parameters or event payload are invalid.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The mutation would drive a wallet balance below zero.
    #[error("Insufficient balance")]
    InsufficientBalance,

    /// A wallet is already registered for this mobile number.
    #[error("Wallet already exists for mobile {0}")]
    WalletExists(String),

    /// A ledger row with this idempotency key already exists.
    #[error("Duplicate transaction for idempotency key {0}")]
    DuplicateTransaction(String),

    /// Connection loss, pool exhaustion, serialization failure or deadlock.
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Any other store fault.
    #[error("Database error: {0}")]
    Persistence(String),

    /// Event payload could not be decoded.
    #[error("Message decode error: {0}")]
    MessageDecode(#[from] serde_json::Error),

    /// Retries are exhausted and the broker redelivered past the threshold.
    #[error("Delivery exhausted for sequence {sequence} after {redelivery_count} redeliveries: {reason}")]
    DeliveryExhausted {
        sequence: u64,
        redelivery_count: u64,
        reason: String,
    },

    /// Cache backend failure. Always absorbed by callers, never surfaced over HTTP.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Message bus failure (connect, publish, ack).
    #[error("Message broker error: {0}")]
    Broker(String),

    /// The surrounding cancellation signal fired.
    #[error("Operation cancelled")]
    Cancelled,
}

impl AppError {
    /// Whether a later attempt of the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::TransientStore(_) | AppError::Broker(_) | AppError::Cache(_)
        )
    }

    /// Errors no amount of retrying can fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, AppError::Validation(_) | AppError::MessageDecode(_))
    }
}

/// Classify driver errors into the service taxonomy.
///
/// SQLSTATE codes treated as transient:
/// - `40001` serialization failure
/// - `40P01` deadlock detected
/// - `55P03` lock not available
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("record"),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::TransientStore(err.to_string())
            }
            sqlx::Error::Database(ref db_err) => {
                match db_err.constraint() {
                    Some(WALLET_MOBILE_CONSTRAINT) => {
                        return AppError::WalletExists(db_err.message().to_string());
                    }
                    Some(TRANSACTION_KEY_CONSTRAINT) => {
                        return AppError::DuplicateTransaction(db_err.message().to_string());
                    }
                    Some(WALLET_BALANCE_CONSTRAINT) => return AppError::InsufficientBalance,
                    _ => {}
                }

                match db_err.code().as_deref() {
                    Some("40001") | Some("40P01") | Some("55P03") => {
                        AppError::TransientStore(err.to_string())
                    }
                    _ => AppError::Persistence(err.to_string()),
                }
            }
            other => AppError::Persistence(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Cache(err.to_string())
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Store, broker and cache details are never leaked to the client.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::Validation(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::MessageDecode(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request", self.to_string())
            }
            AppError::InsufficientBalance => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_balance",
                self.to_string(),
            ),
            AppError::WalletExists(_) => {
                (StatusCode::CONFLICT, "wallet_exists", self.to_string())
            }
            AppError::DuplicateTransaction(_) => {
                (StatusCode::CONFLICT, "duplicate_transaction", self.to_string())
            }
            AppError::TransientStore(_) | AppError::Broker(_) | AppError::Cancelled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "temporarily_unavailable",
                "The service is temporarily unavailable, retry later".to_string(),
            ),
            AppError::Persistence(_)
            | AppError::Cache(_)
            | AppError::DeliveryExhausted { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(%code, "request failed");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AppError::NotFound("wallet"), StatusCode::NOT_FOUND)]
    #[case(AppError::Validation("bad".into()), StatusCode::BAD_REQUEST)]
    #[case(AppError::InsufficientBalance, StatusCode::UNPROCESSABLE_ENTITY)]
    #[case(AppError::WalletExists("09120000000".into()), StatusCode::CONFLICT)]
    #[case(AppError::TransientStore("timeout".into()), StatusCode::SERVICE_UNAVAILABLE)]
    #[case(AppError::Persistence("boom".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn maps_errors_to_status_codes(#[case] err: AppError, #[case] expected: StatusCode) {
        assert_eq!(err.into_response().status(), expected);
    }

    #[test]
    fn pool_timeout_is_transient() {
        let err = AppError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
        assert!(!err.is_permanent());
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(
            AppError::from(sqlx::Error::RowNotFound),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn validation_is_permanent() {
        assert!(AppError::Validation("amount".into()).is_permanent());
        assert!(!AppError::Persistence("disk".into()).is_transient());
    }
}
