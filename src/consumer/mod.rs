//! Queue consumer
//!
//! A fixed pool of workers long-polling the inbound queue. Each worker
//! handles one delivery to completion before taking the next, and stops
//! after its current batch once shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::handlers::QueueDeliveryHandler;
use crate::queue::MessageQueue;

/// Back-off after a failed receive call
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub workers: usize,
    /// Messages per receive call (1..=10)
    pub max_messages: i32,
    /// Long-poll wait per receive call
    pub wait: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_messages: 10,
            wait: Duration::from_secs(20),
        }
    }
}

pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    handler: QueueDeliveryHandler,
    config: ConsumerConfig,
}

impl QueueConsumer {
    pub fn new(queue: Arc<dyn MessageQueue>, handler: QueueDeliveryHandler, config: ConsumerConfig) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Spawn the workers. They exit when `shutdown` flips to true.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let workers = self.config.workers.max(1);
        tracing::info!(
            workers = workers,
            max_messages = self.config.max_messages,
            wait_secs = self.config.wait.as_secs(),
            "Starting queue consumers"
        );

        (0..workers)
            .map(|worker| {
                let queue = self.queue.clone();
                let handler = self.handler.clone();
                let config = self.config;
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    run_worker(worker, queue, handler, config, shutdown).await;
                })
            })
            .collect()
    }
}

async fn run_worker(
    worker: usize,
    queue: Arc<dyn MessageQueue>,
    handler: QueueDeliveryHandler,
    config: ConsumerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let received = tokio::select! {
            received = queue.receive(config.max_messages, config.wait) => received,
            _ = shutdown.changed() => break,
        };

        match received {
            Ok(deliveries) => {
                for delivery in deliveries {
                    let outcome = handler.handle(&delivery).await;
                    tracing::debug!(
                        worker = worker,
                        message_id = ?delivery.message_id,
                        receive_count = delivery.receive_count,
                        acknowledged = outcome.is_acknowledged(),
                        "Delivery handled"
                    );
                }
            }
            Err(e) => {
                tracing::error!(worker = worker, error = %e, "Failed to receive messages");
                tokio::select! {
                    _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    tracing::info!(worker = worker, "Queue consumer stopped");
}
