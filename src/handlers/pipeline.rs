//! Pipeline
//!
//! Collaborators shared by both handlers, constructed once at startup.

use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::{AppliedResult, ApplyError, Aggregator};
use crate::dead_letter::{DeadLetter, DeadLetterError, DeadLetterSink};
use crate::domain::{OrderEvent, ProcessingContext};
use crate::forwarder::DispatchForwarder;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Deadline for each apply or forward call
    pub operation_timeout: Duration,
    /// Handler-level attempts before a retryable failure is dead-lettered
    pub delivery_retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
            delivery_retry: RetryPolicy::default(),
        }
    }
}

pub struct Pipeline {
    aggregator: Aggregator,
    dead_letters: Arc<dyn DeadLetterSink>,
    /// Present in forward mode: change-feed records go to the queue instead
    /// of being applied directly
    forwarder: Option<Arc<DispatchForwarder>>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        aggregator: Aggregator,
        dead_letters: Arc<dyn DeadLetterSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            aggregator,
            dead_letters,
            forwarder: None,
            settings,
        }
    }

    pub fn with_forwarder(mut self, forwarder: Arc<DispatchForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn forwarder(&self) -> Option<&Arc<DispatchForwarder>> {
        self.forwarder.as_ref()
    }

    /// Apply with the handler-level retry budget.
    ///
    /// Conflicts and timeouts are retried; store errors return immediately
    /// so the caller can leave the delivery for redelivery.
    pub async fn apply_with_retry(
        &self,
        event: &OrderEvent,
        ctx: &ProcessingContext,
    ) -> Result<AppliedResult, (ApplyError, u32)> {
        let retry = self.settings.delivery_retry;
        let mut attempt = 0;

        loop {
            let result = self
                .aggregator
                .apply_with_timeout(event, self.settings.operation_timeout)
                .await;

            match result {
                Ok(applied) => return Ok(applied),
                Err(ApplyError::Store(e)) => return Err((ApplyError::Store(e), attempt + 1)),
                Err(e) if e.is_retryable() && retry.should_retry(attempt) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        account_id = %event.account_id,
                        source = ctx.source.as_str(),
                        attempt = attempt + 1,
                        error = %e,
                        "Apply failed, retrying"
                    );
                    retry.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt + 1)),
            }
        }
    }

    pub async fn dead_letter(&self, dead_letter: DeadLetter) -> Result<(), DeadLetterError> {
        self.dead_letters.publish(dead_letter).await
    }
}
