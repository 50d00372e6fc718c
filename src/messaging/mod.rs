//! Message bus integration.
//!
//! This module provides:
//! - `EventPublisher`: at-least-once publish of event payloads
//! - `TransactionSubscriber`: worker pool consuming transaction-created events
//! - `retry`: bounded, cancellable local retry
//! - `decide`: the pure acknowledge / redeliver / dead-letter decision
//! - `NatsBus`: JetStream-backed publisher and durable pull consumer

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::AppError;

pub mod disposition;
pub mod nats;
pub mod retry;
pub mod subscriber;

pub use disposition::{AttemptResult, Disposition, decide};
pub use nats::{JetStreamDelivery, NatsBus};
pub use retry::retry;
pub use subscriber::{Delivery, LedgerWriter, MessageState, RecordOutcome, TransactionSubscriber};

/// Subject carrying transaction-created events.
pub const CREATE_TRANSACTION_SUBJECT: &str = "transaction:create";

/// Subject receiving dead-letter records.
pub const DEAD_LETTER_SUBJECT: &str = "transaction:errors";

pub const TRANSACTION_GROUP: &str = "transaction_service";

pub const DURABLE_NAME: &str = "transaction-dur";

/// Fixed-attempt, fixed-delay retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first one
    pub attempts: u32,

    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Subscription and worker-pool tuning for the transaction consumer.
#[derive(Debug, Clone)]
pub struct SubscriberSettings {
    pub subject: String,

    /// Queue group the workers of every replica belong to
    pub group: String,

    /// Durable consumer name; acknowledgement state survives restarts
    pub durable_name: String,

    pub dead_letter_subject: String,

    pub workers: usize,

    /// Unacknowledged messages are redelivered after this interval
    pub ack_wait: Duration,

    /// Messages in flight per worker
    pub max_inflight: usize,

    /// Redeliveries tolerated before a failing message is dead-lettered
    pub max_redelivery: u64,

    pub retry: RetryPolicy,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            subject: CREATE_TRANSACTION_SUBJECT.to_string(),
            group: TRANSACTION_GROUP.to_string(),
            durable_name: DURABLE_NAME.to_string(),
            dead_letter_subject: DEAD_LETTER_SUBJECT.to_string(),
            workers: 6,
            ack_wait: Duration::from_secs(60),
            max_inflight: 25,
            max_redelivery: 3,
            retry: RetryPolicy::default(),
        }
    }
}

/// Publishes raw payloads to a subject.
///
/// `msg_id` lets the broker drop a republished copy of the same logical
/// message inside its deduplication window.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        msg_id: Option<&str>,
    ) -> Result<(), AppError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    pub msg_id: Option<String>,
}

/// In-process publisher that keeps every message it accepts.
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
    failures: Mutex<u32>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` publishes with a broker error.
    pub fn fail_next(&self, count: u32) {
        *self.failures.lock() = count;
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().clone()
    }

    pub fn published_to(&self, subject: &str) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        msg_id: Option<&str>,
    ) -> Result<(), AppError> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::Broker(format!("publish to {subject} rejected")));
            }
        }

        self.messages.lock().push(PublishedMessage {
            subject: subject.to_string(),
            payload,
            msg_id: msg_id.map(str::to_string),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_publisher_fails_then_recovers() {
        let publisher = RecordingPublisher::new();
        publisher.fail_next(1);

        assert!(publisher.publish("a", b"1".to_vec(), None).await.is_err());
        publisher.publish("a", b"2".to_vec(), Some("k")).await.unwrap();
        publisher.publish("b", b"3".to_vec(), None).await.unwrap();

        let on_a = publisher.published_to("a");
        assert_eq!(on_a.len(), 1);
        assert_eq!(on_a[0].payload, b"2");
        assert_eq!(on_a[0].msg_id.as_deref(), Some("k"));
        assert_eq!(publisher.messages().len(), 2);
    }
}
