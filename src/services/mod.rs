//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers and the
//! message consumer. They own store transactions, validation, cache upkeep
//! and event publishing.

pub mod transaction_service;
pub mod wallet_service;

pub use transaction_service::TransactionService;
pub use wallet_service::{ChargeReceipt, WalletService};
