//! Message bus payloads.
//!
//! - `TransactionCreatedEvent`: published after a committed charge and by
//!   asynchronous producers; consumed by the transaction subscriber
//! - `DeadLetterRecord`: published to the dead-letter subject when a message
//!   keeps failing past the redelivery threshold

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::models::transaction::{NewTransaction, Transaction, TransactionType};

/// Payload of a "transaction created" event.
///
/// # JSON Example
///
/// ```json
/// {
///   "wallet_id": "550e8400-e29b-41d4-a716-446655440000",
///   "amount": 5000,
///   "type": "Charge",
///   "idempotency_key": "b0f6c1d2-..."
/// }
/// ```
///
/// `idempotency_key` is optional on the wire. When a producer omits it the
/// consumer derives one from the stream position, see [`Self::into_new_transaction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCreatedEvent {
    pub wallet_id: Uuid,

    pub amount: i64,

    #[serde(rename = "type")]
    pub kind: TransactionType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl TransactionCreatedEvent {
    /// Event announcing a ledger row that is already committed. Reusing the row's
    /// key makes a redelivered copy of this event a detected duplicate.
    pub fn from_committed(transaction: &Transaction) -> Self {
        Self {
            wallet_id: transaction.wallet_id,
            amount: transaction.amount,
            kind: transaction.kind,
            idempotency_key: Some(transaction.idempotency_key.clone()),
        }
    }

    pub fn into_new_transaction(self, subject: &str, sequence: u64) -> NewTransaction {
        let idempotency_key = self
            .idempotency_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| derived_idempotency_key(subject, sequence));

        NewTransaction {
            wallet_id: self.wallet_id,
            amount: self.amount,
            kind: self.kind,
            idempotency_key,
        }
    }
}

/// Deterministic key for events that carry none. The stream sequence is stable
/// across redeliveries of the same message.
pub fn derived_idempotency_key(subject: &str, sequence: u64) -> String {
    format!("{subject}:{sequence}")
}

/// Failure record published to the dead-letter subject.
///
/// `data` is the raw payload of the failed message, base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub subject: String,

    pub sequence: u64,

    #[serde(serialize_with = "encode_bytes", deserialize_with = "decode_bytes")]
    pub data: Vec<u8>,

    /// Original publish time of the failed message, nanoseconds since the epoch
    pub timestamp: i64,

    pub error: String,

    /// When the failure was escalated
    pub time: DateTime<Utc>,
}

fn encode_bytes<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn decode_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_event_without_key() {
        let wallet_id = Uuid::new_v4();
        let payload = format!(r#"{{"wallet_id":"{wallet_id}","amount":30,"type":"deposit"}}"#);

        let event: TransactionCreatedEvent = serde_json::from_str(&payload).unwrap();
        assert_eq!(event.kind, TransactionType::Deposit);
        assert_eq!(event.idempotency_key, None);

        let entry = event.into_new_transaction("transaction:create", 42);
        assert_eq!(entry.idempotency_key, "transaction:create:42");
        assert_eq!(entry.amount, 30);
    }

    #[test]
    fn keeps_producer_key() {
        let event = TransactionCreatedEvent {
            wallet_id: Uuid::new_v4(),
            amount: 5,
            kind: TransactionType::Refund,
            idempotency_key: Some("refund-17".into()),
        };
        assert_eq!(
            event.into_new_transaction("transaction:create", 1).idempotency_key,
            "refund-17"
        );
    }

    #[test]
    fn blank_key_falls_back_to_sequence() {
        let event = TransactionCreatedEvent {
            wallet_id: Uuid::new_v4(),
            amount: 5,
            kind: TransactionType::Refund,
            idempotency_key: Some("  ".into()),
        };
        assert_eq!(
            event.into_new_transaction("s", 9).idempotency_key,
            derived_idempotency_key("s", 9)
        );
    }

    #[test]
    fn dead_letter_data_is_base64() {
        let record = DeadLetterRecord {
            subject: "transaction:create".into(),
            sequence: 7,
            data: b"not json".to_vec(),
            timestamp: 1_700_000_000_000_000_000,
            error: "boom".into(),
            time: Utc::now(),
        };

        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["data"], "bm90IGpzb24=");
        assert_eq!(json["sequence"], 7);

        let back: DeadLetterRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
