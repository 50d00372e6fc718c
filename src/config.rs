//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use std::time::Duration;

use serde::Deserialize;

use crate::messaging::{RetryPolicy, SubscriberSettings};

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `DATABASE_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `REQUEST_TIMEOUT_SECS` (optional): per-request deadline, defaults to 10
/// - `REDIS_URL` (optional): wallet cache, defaults to `redis://127.0.0.1:6379`
/// - `CACHE_TTL_SECS` (optional): cache entry expiry, defaults to 3600
/// - `NATS_URL` (optional): message bus, defaults to `nats://127.0.0.1:4222`
/// - `SUBSCRIBER_*` / `RETRY_*` (optional): consumer tuning, see field defaults
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    #[serde(default = "default_workers")]
    pub subscriber_workers: usize,

    #[serde(default = "default_ack_wait")]
    pub subscriber_ack_wait_secs: u64,

    #[serde(default = "default_max_inflight")]
    pub subscriber_max_inflight: usize,

    #[serde(default = "default_max_redelivery")]
    pub subscriber_max_redelivery: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    10
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_workers() -> usize {
    6
}

fn default_ack_wait() -> u64 {
    60
}

fn default_max_inflight() -> usize {
    25
}

fn default_max_redelivery() -> u64 {
    3
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        envy::from_env::<Config>()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Local retry policy shared by the consumer and the post-commit publisher.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts.max(1),
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn subscriber_settings(&self) -> SubscriberSettings {
        SubscriberSettings {
            workers: self.subscriber_workers.max(1),
            ack_wait: Duration::from_secs(self.subscriber_ack_wait_secs),
            max_inflight: self.subscriber_max_inflight.max(1),
            max_redelivery: self.subscriber_max_redelivery,
            retry: self.retry_policy(),
            ..SubscriberSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults_when_only_database_url_is_set() {
        let config: Config = envy::from_iter(vec![(
            "DATABASE_URL".to_string(),
            "postgres://localhost/wallet".to_string(),
        )])
        .unwrap();

        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));

        let settings = config.subscriber_settings();
        assert_eq!(settings.workers, 6);
        assert_eq!(settings.ack_wait, Duration::from_secs(60));
        assert_eq!(settings.max_inflight, 25);
        assert_eq!(settings.max_redelivery, 3);
        assert_eq!(settings.retry.attempts, 3);
        assert_eq!(settings.retry.delay, Duration::from_secs(1));
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let result = envy::from_iter::<_, Config>(Vec::<(String, String)>::new());
        assert!(result.is_err());
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let config: Config = envy::from_iter(vec![
            ("DATABASE_URL".to_string(), "postgres://x".to_string()),
            ("RETRY_ATTEMPTS".to_string(), "0".to_string()),
        ])
        .unwrap();
        assert_eq!(config.retry_policy().attempts, 1);
    }
}
