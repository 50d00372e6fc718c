//! NATS JetStream adapter.
//!
//! - two file-backed streams: `TRANSACTIONS` for events and
//!   `TRANSACTION_ERRORS` for dead-letter records
//! - publishes wait for the stream ack and carry `Nats-Msg-Id`, so the
//!   broker drops republished copies inside its duplicate window
//! - the consumer is one durable pull consumer shared by every worker of every
//!   replica, with explicit acks and replay from the start of retention

use std::time::Duration;

use async_nats::jetstream::{
    self, AckKind, Context as JetStreamContext,
    consumer::{AckPolicy, DeliverPolicy, PullConsumer, pull},
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::info;

use crate::error::AppError;
use crate::messaging::{
    CREATE_TRANSACTION_SUBJECT, DEAD_LETTER_SUBJECT, Delivery, EventPublisher, SubscriberSettings,
};

const EVENTS_STREAM: &str = "TRANSACTIONS";
const DEAD_LETTER_STREAM: &str = "TRANSACTION_ERRORS";

fn broker_error(err: impl std::fmt::Display) -> AppError {
    AppError::Broker(err.to_string())
}

#[derive(Clone)]
pub struct NatsBus {
    context: JetStreamContext,
}

impl NatsBus {
    /// Connect and make sure both streams exist.
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        info!(%url, "connecting to NATS JetStream");
        let client = async_nats::connect(url).await.map_err(broker_error)?;
        let bus = Self {
            context: jetstream::new(client),
        };

        bus.ensure_stream(
            EVENTS_STREAM,
            CREATE_TRANSACTION_SUBJECT,
            RetentionPolicy::Limits,
            Duration::from_secs(7 * 24 * 3600),
        )
        .await?;
        bus.ensure_stream(
            DEAD_LETTER_STREAM,
            DEAD_LETTER_SUBJECT,
            RetentionPolicy::Limits,
            Duration::from_secs(30 * 24 * 3600),
        )
        .await?;

        Ok(bus)
    }

    async fn ensure_stream(
        &self,
        name: &str,
        subject: &str,
        retention: RetentionPolicy,
        max_age: Duration,
    ) -> Result<(), AppError> {
        let config = StreamConfig {
            name: name.to_string(),
            subjects: vec![subject.to_string()],
            retention,
            storage: StorageType::File,
            max_age,
            duplicate_window: Duration::from_secs(120),
            ..Default::default()
        };

        self.context
            .get_or_create_stream(config)
            .await
            .map_err(broker_error)?;
        info!(stream = name, subject, "stream ready");
        Ok(())
    }

    /// Create (or bind to) the durable consumer described by `settings`.
    pub async fn consumer(&self, settings: &SubscriberSettings) -> Result<PullConsumer, AppError> {
        let max_ack_pending = settings.workers.saturating_mul(settings.max_inflight);
        let config = pull::Config {
            durable_name: Some(settings.durable_name.clone()),
            description: Some(format!("{} workers", settings.group)),
            filter_subject: settings.subject.clone(),
            ack_policy: AckPolicy::Explicit,
            ack_wait: settings.ack_wait,
            // dead-lettering is decided by the subscriber, never by the server
            max_deliver: -1,
            max_ack_pending: i64::try_from(max_ack_pending).unwrap_or(i64::MAX),
            deliver_policy: DeliverPolicy::All,
            ..Default::default()
        };

        let consumer = self
            .context
            .get_stream(EVENTS_STREAM)
            .await
            .map_err(broker_error)?
            .create_consumer(config)
            .await
            .map_err(broker_error)?;

        info!(
            durable = %settings.durable_name,
            group = %settings.group,
            "durable consumer ready"
        );
        Ok(consumer)
    }

    /// One delivery stream per worker, all pulling from the same durable consumer.
    pub async fn worker_streams(
        &self,
        settings: &SubscriberSettings,
    ) -> Result<Vec<BoxStream<'static, Result<JetStreamDelivery, AppError>>>, AppError> {
        let consumer = self.consumer(settings).await?;

        let mut streams = Vec::with_capacity(settings.workers);
        for _ in 0..settings.workers {
            let messages = consumer
                .stream()
                .max_messages_per_batch(settings.max_inflight)
                .messages()
                .await
                .map_err(broker_error)?;

            streams.push(
                messages
                    .map(|message| message.map_err(broker_error).and_then(JetStreamDelivery::new))
                    .boxed(),
            );
        }
        Ok(streams)
    }
}

#[async_trait]
impl EventPublisher for NatsBus {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        msg_id: Option<&str>,
    ) -> Result<(), AppError> {
        let mut headers = async_nats::HeaderMap::new();
        if let Some(id) = msg_id {
            headers.insert("Nats-Msg-Id", id);
        }

        self.context
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await
            .map_err(broker_error)?
            .await
            .map_err(broker_error)?;

        Ok(())
    }
}

/// A JetStream message with its delivery metadata read up front.
pub struct JetStreamDelivery {
    message: jetstream::Message,
    subject: String,
    sequence: u64,
    redelivery_count: u64,
    timestamp: i64,
}

impl JetStreamDelivery {
    pub fn new(message: jetstream::Message) -> Result<Self, AppError> {
        let (sequence, delivered, timestamp) = {
            let info = message.info().map_err(broker_error)?;
            let timestamp = i64::try_from(info.published.unix_timestamp_nanos()).unwrap_or(i64::MAX);
            (info.stream_sequence, info.delivered, timestamp)
        };

        Ok(Self {
            subject: message.subject.to_string(),
            sequence,
            // the broker counts the first delivery as 1
            redelivery_count: u64::try_from(delivered.saturating_sub(1)).unwrap_or(0),
            timestamp,
            message,
        })
    }
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn redelivery_count(&self) -> u64 {
        self.redelivery_count
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    async fn ack(&self) -> Result<(), AppError> {
        self.message.ack().await.map_err(broker_error)
    }

    async fn term(&self) -> Result<(), AppError> {
        self.message.ack_with(AckKind::Term).await.map_err(broker_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires NATS server with JetStream enabled
    async fn connects_and_creates_consumer() {
        let bus = NatsBus::connect("nats://localhost:4222")
            .await
            .expect("Failed to connect");

        let settings = SubscriberSettings {
            workers: 2,
            ..SubscriberSettings::default()
        };
        let streams = bus.worker_streams(&settings).await.expect("Failed to subscribe");
        assert_eq!(streams.len(), 2);
    }
}
