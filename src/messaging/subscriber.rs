//! Reliable consumer for transaction-created events.
//!
//! Each delivery moves through
//! `Delivered -> Processing -> {Acknowledged | RedeliveryPending | DeadLettered}`,
//! or straight to `Dropped` when the payload cannot be decoded.
//!
//! Persistence is retried locally under [`RetryPolicy`](crate::messaging::RetryPolicy).
//! When that fails the message is left for the broker to redeliver until its
//! redelivery count crosses the threshold, then a [`DeadLetterRecord`] is
//! published and the original acknowledged. The ledger write is idempotent on
//! the event's key, so redelivery never produces a second row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::messaging::{
    AttemptResult, Disposition, EventPublisher, SubscriberSettings, decide, retry,
};
use crate::metrics::{Metrics, counters};
use crate::models::event::{DeadLetterRecord, TransactionCreatedEvent};
use crate::models::transaction::NewTransaction;

/// One message handed out by the broker.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn subject(&self) -> &str;

    fn payload(&self) -> &[u8];

    /// Position in the stream, stable across redeliveries
    fn sequence(&self) -> u64;

    /// Zero on first delivery
    fn redelivery_count(&self) -> u64;

    /// Original publish time, nanoseconds since the epoch
    fn timestamp(&self) -> i64;

    async fn ack(&self) -> Result<(), AppError>;

    /// Tell the broker never to redeliver this message.
    async fn term(&self) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// A row with the same idempotency key already exists
    Duplicate,
}

/// The ledger-write path the consumer persists events through.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn record(&self, entry: NewTransaction) -> Result<RecordOutcome, AppError>;
}

/// Terminal state of one processed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Acknowledged,
    RedeliveryPending,
    DeadLettered,
    Dropped,
}

pub struct TransactionSubscriber {
    writer: Arc<dyn LedgerWriter>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<dyn Metrics>,
    settings: SubscriberSettings,
}

impl TransactionSubscriber {
    pub fn new(
        writer: Arc<dyn LedgerWriter>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<dyn Metrics>,
        settings: SubscriberSettings,
    ) -> Self {
        Self {
            writer,
            publisher,
            metrics,
            settings,
        }
    }

    /// Drive one worker per stream until every stream ends or `cancel` fires.
    ///
    /// Each worker processes one message at a time. Distribution across
    /// workers and replicas is left to the broker.
    pub async fn run<S, D>(self: Arc<Self>, workers: Vec<S>, cancel: CancellationToken)
    where
        S: Stream<Item = Result<D, AppError>> + Send + Unpin + 'static,
        D: Delivery + 'static,
    {
        info!(
            subject = %self.settings.subject,
            group = %self.settings.group,
            workers = workers.len(),
            "starting transaction subscriber"
        );

        let mut pool = JoinSet::new();
        for (worker_id, deliveries) in workers.into_iter().enumerate() {
            let subscriber = self.clone();
            let cancel = cancel.clone();
            pool.spawn(async move { subscriber.worker(worker_id, deliveries, cancel).await });
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "subscriber worker panicked");
            }
        }
        info!("transaction subscriber stopped");
    }

    async fn worker<S, D>(&self, worker_id: usize, mut deliveries: S, cancel: CancellationToken)
    where
        S: Stream<Item = Result<D, AppError>> + Send + Unpin,
        D: Delivery,
    {
        debug!(worker_id, "worker started");
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.process(&delivery, &cancel).await;
                }
                Some(Err(e)) => warn!(worker_id, error = %e, "failed to receive message"),
                None => break,
            }
        }
        debug!(worker_id, "worker stopped");
    }

    /// Run one delivery through decode, persistence and acknowledgement.
    pub async fn process<D: Delivery + ?Sized>(
        &self,
        delivery: &D,
        cancel: &CancellationToken,
    ) -> MessageState {
        self.metrics.increment_counter(counters::MESSAGES_TOTAL);
        let sequence = delivery.sequence();
        let redelivery_count = delivery.redelivery_count();

        let event: TransactionCreatedEvent = match serde_json::from_slice(delivery.payload()) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.increment_counter(counters::DECODE_ERROR);
                self.metrics.increment_counter(counters::MESSAGES_ERROR);
                error!(sequence, error = %AppError::from(e), "dropping undecodable message");
                if let Err(e) = delivery.term().await {
                    warn!(sequence, error = %e, "failed to terminate message");
                }
                return MessageState::Dropped;
            }
        };

        let entry = event.into_new_transaction(delivery.subject(), sequence);
        let key = entry.idempotency_key.clone();

        let result = retry(&self.settings.retry, cancel, || {
            self.writer.record(entry.clone())
        })
        .await;

        let err = match result {
            Ok(outcome) => {
                if outcome == RecordOutcome::Duplicate {
                    self.metrics.increment_counter(counters::DUPLICATE);
                    debug!(sequence, idempotency_key = %key, "event already recorded");
                }
                None
            }
            Err(AppError::Cancelled) => {
                info!(sequence, "processing cancelled, leaving message for redelivery");
                return MessageState::RedeliveryPending;
            }
            Err(e) => {
                self.metrics.increment_counter(counters::MESSAGES_ERROR);
                error!(sequence, redelivery_count, error = %e, "failed to record transaction");
                Some(e)
            }
        };

        let attempt = match err {
            None => AttemptResult::Succeeded,
            Some(_) => AttemptResult::Failed,
        };

        match decide(attempt, redelivery_count, self.settings.max_redelivery) {
            Disposition::Ack => {
                if let Err(e) = delivery.ack().await {
                    warn!(sequence, error = %e, "failed to ack message");
                    return MessageState::RedeliveryPending;
                }
                self.metrics.increment_counter(counters::MESSAGES_SUCCESS);
                MessageState::Acknowledged
            }
            Disposition::LeaveUnacked => MessageState::RedeliveryPending,
            Disposition::DeadLetterThenAck => {
                let reason = err.map(|e| e.to_string()).unwrap_or_default();
                self.dead_letter(delivery, reason).await
            }
        }
    }

    async fn dead_letter<D: Delivery + ?Sized>(&self, delivery: &D, reason: String) -> MessageState {
        let sequence = delivery.sequence();
        let exhausted = AppError::DeliveryExhausted {
            sequence,
            redelivery_count: delivery.redelivery_count(),
            reason: reason.clone(),
        };
        error!(error = %exhausted, "escalating message to dead letter");

        let record = DeadLetterRecord {
            subject: delivery.subject().to_string(),
            sequence,
            data: delivery.payload().to_vec(),
            timestamp: delivery.timestamp(),
            error: reason,
            time: Utc::now(),
        };

        let payload = match serde_json::to_vec(&record) {
            Ok(payload) => payload,
            Err(e) => {
                error!(sequence, error = %e, "failed to encode dead-letter record");
                return MessageState::RedeliveryPending;
            }
        };

        // keyed by stream position so a repeated escalation is deduplicated
        let msg_id = format!("{}:{}:dead-letter", record.subject, sequence);
        if let Err(e) = self
            .publisher
            .publish(&self.settings.dead_letter_subject, payload, Some(&msg_id))
            .await
        {
            error!(sequence, error = %e, "failed to publish dead-letter record");
            return MessageState::RedeliveryPending;
        }
        self.metrics.increment_counter(counters::DEAD_LETTER);

        if let Err(e) = delivery.ack().await {
            warn!(sequence, error = %e, "failed to ack dead-lettered message");
            return MessageState::RedeliveryPending;
        }
        MessageState::DeadLettered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{RecordingPublisher, RetryPolicy};
    use crate::metrics::RecordingMetrics;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct FakeDelivery {
        payload: Vec<u8>,
        redelivery_count: u64,
        acked: AtomicBool,
        termed: AtomicBool,
    }

    impl FakeDelivery {
        fn new(payload: Vec<u8>, redelivery_count: u64) -> Self {
            Self {
                payload,
                redelivery_count,
                acked: AtomicBool::new(false),
                termed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Delivery for FakeDelivery {
        fn subject(&self) -> &str {
            "transaction:create"
        }

        fn payload(&self) -> &[u8] {
            &self.payload
        }

        fn sequence(&self) -> u64 {
            11
        }

        fn redelivery_count(&self) -> u64 {
            self.redelivery_count
        }

        fn timestamp(&self) -> i64 {
            1_700_000_000_000_000_000
        }

        async fn ack(&self) -> Result<(), AppError> {
            self.acked.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn term(&self) -> Result<(), AppError> {
            self.termed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails the first `failures` calls.
    struct FlakyWriter {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LedgerWriter for FlakyWriter {
        async fn record(&self, _entry: NewTransaction) -> Result<RecordOutcome, AppError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(AppError::TransientStore("connection reset".into()));
            }
            Ok(RecordOutcome::Recorded)
        }
    }

    fn subscriber(
        failures: u32,
    ) -> (TransactionSubscriber, Arc<RecordingPublisher>, Arc<RecordingMetrics>) {
        let publisher = Arc::new(RecordingPublisher::new());
        let metrics = Arc::new(RecordingMetrics::new());
        let settings = SubscriberSettings {
            retry: RetryPolicy {
                attempts: 3,
                delay: Duration::ZERO,
            },
            ..SubscriberSettings::default()
        };
        let writer = Arc::new(FlakyWriter {
            failures,
            calls: AtomicU32::new(0),
        });
        (
            TransactionSubscriber::new(writer, publisher.clone(), metrics.clone(), settings),
            publisher,
            metrics,
        )
    }

    fn payload() -> Vec<u8> {
        format!(
            r#"{{"wallet_id":"{}","amount":10,"type":"Deposit"}}"#,
            Uuid::new_v4()
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn local_retry_absorbs_transient_failures() {
        let (subscriber, publisher, metrics) = subscriber(2);
        let delivery = FakeDelivery::new(payload(), 0);

        let state = subscriber.process(&delivery, &CancellationToken::new()).await;

        assert_eq!(state, MessageState::Acknowledged);
        assert!(delivery.acked.load(Ordering::SeqCst));
        assert!(publisher.messages().is_empty());
        assert_eq!(metrics.count(counters::MESSAGES_SUCCESS), 1);
    }

    #[tokio::test]
    async fn undecodable_payload_is_terminated() {
        let (subscriber, _, metrics) = subscriber(0);
        let delivery = FakeDelivery::new(b"{not json".to_vec(), 0);

        let state = subscriber.process(&delivery, &CancellationToken::new()).await;

        assert_eq!(state, MessageState::Dropped);
        assert!(delivery.termed.load(Ordering::SeqCst));
        assert!(!delivery.acked.load(Ordering::SeqCst));
        assert_eq!(metrics.count(counters::DECODE_ERROR), 1);
    }

    #[tokio::test]
    async fn dead_letter_publish_failure_leaves_message_unacked() {
        let (subscriber, publisher, metrics) = subscriber(u32::MAX);
        publisher.fail_next(1);
        let delivery = FakeDelivery::new(payload(), 4);

        let state = subscriber.process(&delivery, &CancellationToken::new()).await;

        assert_eq!(state, MessageState::RedeliveryPending);
        assert!(!delivery.acked.load(Ordering::SeqCst));
        assert_eq!(metrics.count(counters::DEAD_LETTER), 0);
    }

    #[tokio::test]
    async fn cancelled_processing_is_left_for_redelivery() {
        let (subscriber, publisher, _) = subscriber(u32::MAX);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let delivery = FakeDelivery::new(payload(), 10);

        let state = subscriber.process(&delivery, &cancel).await;

        assert_eq!(state, MessageState::RedeliveryPending);
        assert!(!delivery.acked.load(Ordering::SeqCst));
        assert!(publisher.messages().is_empty());
    }

    #[tokio::test]
    async fn workers_drain_their_streams() {
        let (subscriber, _, metrics) = subscriber(0);
        let streams: Vec<_> = (0..3)
            .map(|_| {
                futures::stream::iter(vec![
                    Ok(FakeDelivery::new(payload(), 0)),
                    Err(AppError::Broker("heartbeat missed".into())),
                    Ok(FakeDelivery::new(payload(), 0)),
                ])
            })
            .collect();

        Arc::new(subscriber)
            .run(streams, CancellationToken::new())
            .await;

        assert_eq!(metrics.count(counters::MESSAGES_TOTAL), 6);
        assert_eq!(metrics.count(counters::MESSAGES_SUCCESS), 6);
    }
}
