//! Observability capability injected into every component.
//!
//! Components never touch process-wide counters. They receive an
//! `Arc<dyn Metrics>` and call [`Metrics::increment_counter`] with one of the
//! names in [`counters`].

use dashmap::DashMap;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counter names emitted by the service.
pub mod counters {
    pub const CHARGE_SUCCESS: &str = "wallet_charge_success";
    pub const CHARGE_ERROR: &str = "wallet_charge_error";
    pub const CACHE_ERROR: &str = "wallet_cache_error";
    pub const PUBLISH_ERROR: &str = "transaction_publish_error";
    pub const MESSAGES_TOTAL: &str = "subscriber_messages_total";
    pub const MESSAGES_SUCCESS: &str = "subscriber_messages_success";
    pub const MESSAGES_ERROR: &str = "subscriber_messages_error";
    pub const DECODE_ERROR: &str = "subscriber_decode_error";
    pub const DEAD_LETTER: &str = "subscriber_dead_letter";
    pub const DUPLICATE: &str = "subscriber_duplicate";
}

pub trait Metrics: Send + Sync {
    fn increment_counter(&self, name: &str);
}

/// Prometheus-backed counters, one label value per counter name.
pub struct PrometheusMetrics {
    registry: Registry,
    events: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let events = IntCounterVec::new(
            Opts::new("wallet_service_events_total", "Wallet service events by name"),
            &["event"],
        )?;
        registry.register(Box::new(events.clone()))?;

        Ok(Self { registry, events })
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Metrics for PrometheusMetrics {
    fn increment_counter(&self, name: &str) {
        self.events.with_label_values(&[name]).inc();
    }
}

/// In-memory counters. Used by tests to assert on emitted events.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    counts: DashMap<String, u64>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counts.get(name).map(|c| *c).unwrap_or(0)
    }
}

impl Metrics for RecordingMetrics {
    fn increment_counter(&self, name: &str) {
        *self.counts.entry(name.to_string()).or_insert(0) += 1;
    }
}
