//! Wallet service library.
//!
//! Balances live in the relational store and every change to one is written
//! together with its ledger row. A Redis cache shadows wallet reads, and a
//! NATS JetStream consumer records transaction-created events at least once,
//! idempotently, with dead-lettering for messages that keep failing.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod services;
pub mod validation;
