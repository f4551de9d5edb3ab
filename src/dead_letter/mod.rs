//! Dead-letter destination
//!
//! Holds payloads that cannot be applied (malformed input, exhausted retries)
//! for manual inspection. A payload counts as handled only once the sink has
//! durably accepted it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::DEAD_LETTER_TABLE;
use crate::domain::DeliverySource;
use crate::queue::MessageQueue;

/// Errors that can occur while writing a dead letter
#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to serialize dead letter: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to publish dead letter: {0}")]
    PublishFailed(String),
}

/// One payload that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub source: DeliverySource,
    /// Raw payload exactly as received
    pub payload: String,
    pub error: String,
    pub event_id: Option<String>,
    pub account_id: Option<String>,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(source: DeliverySource, payload: impl Into<String>, error: impl ToString) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            payload: payload.into(),
            error: error.to_string(),
            event_id: None,
            account_id: None,
            attempts: 1,
            failed_at: Utc::now(),
        }
    }

    pub fn with_event(mut self, event_id: impl Into<String>, account_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Durably store a dead letter.
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DeadLetterError>;
}

// =========================================================================
// Postgres table sink
// =========================================================================

#[derive(Debug, Clone)]
pub struct PgDeadLetterStore {
    pool: PgPool,
}

impl PgDeadLetterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterSink for PgDeadLetterStore {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DeadLetterError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, source, event_id, account_id, payload, error, attempts, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
            DEAD_LETTER_TABLE
        ))
        .bind(dead_letter.id)
        .bind(dead_letter.source.as_str())
        .bind(&dead_letter.event_id)
        .bind(&dead_letter.account_id)
        .bind(&dead_letter.payload)
        .bind(&dead_letter.error)
        .bind(dead_letter.attempts as i32)
        .bind(dead_letter.failed_at)
        .execute(&self.pool)
        .await?;

        tracing::warn!(
            dead_letter_id = %dead_letter.id,
            source = dead_letter.source.as_str(),
            event_id = ?dead_letter.event_id,
            error = %dead_letter.error,
            "Payload written to dead-letter table"
        );
        Ok(())
    }
}

// =========================================================================
// Queue sink
// =========================================================================

/// Publishes dead letters as JSON onto a dedicated queue
pub struct QueueDeadLetterSink {
    queue: Arc<dyn MessageQueue>,
}

impl QueueDeadLetterSink {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl DeadLetterSink for QueueDeadLetterSink {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DeadLetterError> {
        let body = serde_json::to_string(&dead_letter)?;
        let message_id = self
            .queue
            .send(&body, None)
            .await
            .map_err(|e| DeadLetterError::PublishFailed(e.to_string()))?;

        tracing::warn!(
            dead_letter_id = %dead_letter.id,
            message_id = %message_id,
            event_id = ?dead_letter.event_id,
            error = %dead_letter.error,
            "Payload sent to dead-letter queue"
        );
        Ok(())
    }
}

// =========================================================================
// In-memory sink
// =========================================================================

#[derive(Debug, Default)]
pub struct MemoryDeadLetters {
    letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.letters.lock().await.len()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DeadLetterError> {
        self.letters.lock().await.push(dead_letter);
        Ok(())
    }
}
