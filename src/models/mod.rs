//! Data models representing database entities and bus payloads.

/// Bus payloads (transaction-created events, dead-letter records)
pub mod event;
/// Ledger entry model
pub mod transaction;
/// Wallet model
pub mod wallet;
