//! In-memory queue
//!
//! Visibility semantics are simplified: a received message stays in flight
//! until acknowledged or until `requeue_unacked` puts it back.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{Delivery, MessageQueue, QueueError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
    pub body: String,
    pub delay: Option<Duration>,
}

#[derive(Debug, Clone)]
struct Stored {
    message_id: String,
    body: String,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<Stored>,
    in_flight: HashMap<String, Stored>,
    sent: Vec<SentMessage>,
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    next_id: AtomicU64,
    failing_sends: AtomicU32,
    stalled_sends: AtomicU32,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail
    pub fn fail_next_sends(&self, count: u32) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` sends hang until the caller gives up
    pub fn stall_next_sends(&self, count: u32) {
        self.stalled_sends.store(count, Ordering::SeqCst);
    }

    /// Every message ever sent, in order
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().await.sent.clone()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Return every unacknowledged delivery to the queue, as a visibility
    /// timeout would.
    pub async fn requeue_unacked(&self) -> usize {
        let mut state = self.state.lock().await;
        let returned: Vec<Stored> = state.in_flight.drain().map(|(_, m)| m).collect();
        let count = returned.len();
        state.pending.extend(returned);
        drop(state);

        if count > 0 {
            self.notify.notify_waiters();
        }
        count
    }

    /// Enqueue a body as if it had been published by another producer
    pub async fn push(&self, body: impl Into<String>) -> String {
        let message_id = self.next_message_id();
        self.state.lock().await.pending.push_back(Stored {
            message_id: message_id.clone(),
            body: body.into(),
            receive_count: 0,
        });
        self.notify.notify_waiters();
        message_id
    }

    fn next_message_id(&self) -> String {
        format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn take(&self, max_messages: i32) -> Vec<Delivery> {
        let mut state = self.state.lock().await;
        let mut deliveries = Vec::new();

        while deliveries.len() < max_messages.max(1) as usize {
            let Some(mut message) = state.pending.pop_front() else {
                break;
            };
            message.receive_count += 1;

            let receipt_handle = format!("{}#{}", message.message_id, message.receive_count);
            deliveries.push(Delivery {
                message_id: Some(message.message_id.clone()),
                receipt_handle: receipt_handle.clone(),
                body: message.body.clone(),
                receive_count: message.receive_count,
            });
            state.in_flight.insert(receipt_handle, message);
        }

        deliveries
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send(&self, body: &str, delay: Option<Duration>) -> Result<String, QueueError> {
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(QueueError::Send("injected send failure".to_string()));
        }

        let stalled = self
            .stalled_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if stalled.is_ok() {
            std::future::pending::<()>().await;
        }

        let message_id = self.next_message_id();
        {
            let mut state = self.state.lock().await;
            state.sent.push(SentMessage {
                message_id: message_id.clone(),
                body: body.to_string(),
                delay,
            });
            state.pending.push_back(Stored {
                message_id: message_id.clone(),
                body: body.to_string(),
                receive_count: 0,
            });
        }
        self.notify.notify_waiters();

        Ok(message_id)
    }

    async fn receive(&self, max_messages: i32, wait: Duration) -> Result<Vec<Delivery>, QueueError> {
        let notified = self.notify.notified();
        let deliveries = self.take(max_messages).await;
        if !deliveries.is_empty() || wait.is_zero() {
            return Ok(deliveries);
        }

        let _ = tokio::time::timeout(wait, notified).await;
        Ok(self.take(max_messages).await)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(receipt_handle)
            .map(|_| ())
            .ok_or_else(|| QueueError::Ack(format!("unknown receipt handle: {}", receipt_handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_receive_ack() {
        let queue = MemoryQueue::new();
        queue.send("{}", Some(Duration::from_secs(10))).await.unwrap();

        let deliveries = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].receive_count, 1);
        assert_eq!(queue.in_flight_len().await, 1);

        queue.ack(&deliveries[0].receipt_handle).await.unwrap();
        assert_eq!(queue.in_flight_len().await, 0);
        assert_eq!(queue.sent().await[0].delay, Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_unacked_message_is_redelivered() {
        let queue = MemoryQueue::new();
        queue.push("body").await;

        let first = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(queue.requeue_unacked().await, 1);

        let second = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_eq!(second[0].receive_count, 2);

        // Stale receipt handles no longer acknowledge anything
        assert!(queue.ack(&first[0].receipt_handle).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_send_failures() {
        let queue = MemoryQueue::new();
        queue.fail_next_sends(2);

        assert!(queue.send("a", None).await.is_err());
        assert!(queue.send("a", None).await.is_err());
        assert!(queue.send("a", None).await.is_ok());
        assert_eq!(queue.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_receive_waits_for_send() {
        let queue = std::sync::Arc::new(MemoryQueue::new());
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.send("late", None).await.unwrap();
        });

        let deliveries = queue.receive(1, Duration::from_secs(2)).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].body, "late");
    }
}
