//! In-memory relay queue that models the dedup window.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{QueueError, QueuedMessage, RelayQueue, DEFAULT_DEDUP_WINDOW};
use crate::event::current_timestamp_millis;

#[derive(Debug, Default)]
struct QueueState {
    delivered: Vec<QueuedMessage>,
    first_seen: HashMap<String, Instant>,
    attempts: usize,
}

/// Queue that captures delivered messages
///
/// Uses the tokio clock so tests can advance time past the window.
#[derive(Debug)]
pub struct MemoryRelayQueue {
    window: Duration,
    state: Mutex<QueueState>,
    fail_next: AtomicUsize,
}

impl Default for MemoryRelayQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl MemoryRelayQueue {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(QueueState::default()),
            fail_next: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` enqueues fail with `QueueError::Unavailable`
    pub fn set_fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// All messages delivered downstream, in order
    pub async fn delivered(&self) -> Vec<QueuedMessage> {
        self.state.lock().await.delivered.clone()
    }

    /// Number of delivered messages carrying `dedup_key`
    pub async fn delivered_count(&self, dedup_key: &str) -> usize {
        self.state
            .lock()
            .await
            .delivered
            .iter()
            .filter(|m| m.dedup_key == dedup_key)
            .count()
    }

    /// Number of successful enqueue calls, including collapsed duplicates
    pub async fn attempts(&self) -> usize {
        self.state.lock().await.attempts
    }
}

#[async_trait]
impl RelayQueue for MemoryRelayQueue {
    async fn enqueue(&self, dedup_key: &str, payload: &str) -> Result<(), QueueError> {
        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(QueueError::Unavailable("injected enqueue failure".to_string()));
        }

        let now = Instant::now();
        let window = self.window;
        let mut state = self.state.lock().await;
        state.attempts += 1;
        state
            .first_seen
            .retain(|_, first| now.duration_since(*first) < window);

        if state.first_seen.contains_key(dedup_key) {
            return Ok(());
        }

        state.first_seen.insert(dedup_key.to_string(), now);
        state.delivered.push(QueuedMessage {
            dedup_key: dedup_key.to_string(),
            body: payload.to_string(),
            enqueued_at: current_timestamp_millis(),
        });
        Ok(())
    }

    fn dedup_window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_enqueue_delivers_message() {
        let queue = MemoryRelayQueue::default();
        assert_ok!(queue.enqueue("Transaction:0xabc", r#"{"hash":"0xabc"}"#).await);

        let delivered = queue.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].dedup_key, "Transaction:0xabc");
        assert_eq!(delivered[0].body, r#"{"hash":"0xabc"}"#);
    }

    #[tokio::test]
    async fn test_duplicate_key_inside_window_is_collapsed() {
        let queue = MemoryRelayQueue::default();
        assert_ok!(queue.enqueue("k", "a").await);
        assert_ok!(queue.enqueue("k", "a").await);

        assert_eq!(queue.delivered_count("k").await, 1);
        assert_eq!(queue.attempts().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_key_after_window_is_delivered_again() {
        let queue = MemoryRelayQueue::new(Duration::from_secs(60));
        assert_ok!(queue.enqueue("k", "a").await);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_ok!(queue.enqueue("k", "a").await);

        assert_eq!(queue.delivered_count("k").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_are_pruned() {
        let queue = MemoryRelayQueue::new(Duration::from_secs(60));
        assert_eq!(queue.dedup_window(), Duration::from_secs(60));
        assert_ok!(queue.enqueue("a", "1").await);
        assert_ok!(queue.enqueue("b", "2").await);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_ok!(queue.enqueue("c", "3").await);

        let state = queue.state.lock().await;
        assert_eq!(state.first_seen.len(), 1);
        assert!(state.first_seen.contains_key("c"));
    }

    #[tokio::test]
    async fn test_distinct_keys_are_not_collapsed() {
        let queue = MemoryRelayQueue::default();
        assert_ok!(queue.enqueue("Transaction:0xabc", "a").await);
        assert_ok!(queue.enqueue("Message:0xabc", "a").await);
        assert_eq!(queue.delivered().await.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_delivers_nothing() {
        let queue = MemoryRelayQueue::default();
        queue.set_fail_next(1);

        assert_err!(queue.enqueue("k", "a").await);
        assert!(queue.delivered().await.is_empty());

        assert_ok!(queue.enqueue("k", "a").await);
        assert_eq!(queue.delivered_count("k").await, 1);
    }
}
