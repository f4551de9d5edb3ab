//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::aggregate::RemovePolicy;
use crate::consumer::ConsumerConfig;
use crate::db::is_valid_identifier;
use crate::queue::MAX_DELIVERY_DELAY;
use crate::retry::RetryPolicy;

/// How change-feed records are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Apply every record to the store inline
    Direct,
    /// Publish every record to the queue; consumers apply it
    Forward,
}

impl FromStr for StreamMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(StreamMode::Direct),
            "forward" => Ok(StreamMode::Forward),
            _ => Err(()),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Summary table; the ledger lives in `<summary_table>_events`
    pub summary_table: String,

    /// Queue the forwarder publishes to and consumers poll
    pub queue_url: String,

    /// Dead letters go here when set, else to the dead_letters table
    pub dead_letter_queue_url: Option<String>,

    pub aws_region: Option<String>,
    pub aws_endpoint_url: Option<String>,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub stream_mode: StreamMode,
    pub forward_delay: Duration,
    pub remove_policy: RemovePolicy,

    /// Compare-and-swap attempts per apply
    pub apply_max_conflict_retries: u32,
    pub operation_timeout: Duration,
    /// Handler-level attempts before a record is dead-lettered
    pub delivery_max_attempts: u32,
    pub retry_base_delay: Duration,

    pub consumer_enabled: bool,
    pub consumer_workers: usize,
    pub consumer_max_messages: i32,
    pub consumer_wait: Duration,

    /// Ledger pruning is off when unset
    pub ledger_retention_days: Option<u32>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingEnv(key))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = required("DATABASE_URL")?;

        let summary_table = required("SUMMARY_TABLE")?;
        if !is_valid_identifier(&summary_table) {
            return Err(ConfigError::InvalidValue("SUMMARY_TABLE"));
        }

        let queue_url = required("SQS_QUEUE_URL")?;

        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?;
        let host = optional("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "PORT", 3000u16)?;
        let environment = optional("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let stream_mode = parse_or(&lookup, "STREAM_MODE", StreamMode::Forward)?;

        let forward_delay_secs = parse_or(&lookup, "FORWARD_DELAY_SECS", 10u64)?;
        if forward_delay_secs > MAX_DELIVERY_DELAY.as_secs() {
            return Err(ConfigError::InvalidValue("FORWARD_DELAY_SECS"));
        }

        let remove_policy = parse_or(&lookup, "REMOVE_POLICY", RemovePolicy::Clamp)?;

        let apply_max_conflict_retries = parse_or(&lookup, "APPLY_MAX_CONFLICT_RETRIES", 5u32)?;
        let operation_timeout_ms = parse_or(&lookup, "OPERATION_TIMEOUT_MS", 5000u64)?;
        if operation_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("OPERATION_TIMEOUT_MS"));
        }
        let delivery_max_attempts = parse_or(&lookup, "DELIVERY_MAX_ATTEMPTS", 3u32)?;
        let retry_base_delay_ms = parse_or(&lookup, "RETRY_BASE_DELAY_MS", 50u64)?;

        let consumer_enabled = parse_or(&lookup, "CONSUMER_ENABLED", true)?;
        let consumer_workers = parse_or(&lookup, "CONSUMER_WORKERS", 2usize)?;
        let consumer_max_messages = parse_or(&lookup, "CONSUMER_MAX_MESSAGES", 10i32)?;
        if !(1..=10).contains(&consumer_max_messages) {
            return Err(ConfigError::InvalidValue("CONSUMER_MAX_MESSAGES"));
        }
        let consumer_wait_secs = parse_or(&lookup, "CONSUMER_WAIT_SECS", 20u64)?;
        if consumer_wait_secs > 20 {
            return Err(ConfigError::InvalidValue("CONSUMER_WAIT_SECS"));
        }

        let ledger_retention_days = match optional("LEDGER_RETENTION_DAYS") {
            Some(v) => Some(
                v.trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|days| *days > 0)
                    .ok_or(ConfigError::InvalidValue("LEDGER_RETENTION_DAYS"))?,
            ),
            None => None,
        };

        Ok(Self {
            database_url,
            database_max_connections,
            summary_table,
            queue_url,
            dead_letter_queue_url: optional("DEAD_LETTER_QUEUE_URL"),
            aws_region: optional("AWS_REGION"),
            aws_endpoint_url: optional("AWS_ENDPOINT_URL"),
            host,
            port,
            environment,
            stream_mode,
            forward_delay: Duration::from_secs(forward_delay_secs),
            remove_policy,
            apply_max_conflict_retries,
            operation_timeout: Duration::from_millis(operation_timeout_ms),
            delivery_max_attempts,
            retry_base_delay: Duration::from_millis(retry_base_delay_ms),
            consumer_enabled,
            consumer_workers,
            consumer_max_messages,
            consumer_wait: Duration::from_secs(consumer_wait_secs),
            ledger_retention_days,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn conflict_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.apply_max_conflict_retries, self.retry_base_delay)
    }

    pub fn delivery_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.delivery_max_attempts, self.retry_base_delay)
    }

    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig {
            workers: self.consumer_workers,
            max_messages: self.consumer_max_messages,
            wait: self.consumer_wait,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
