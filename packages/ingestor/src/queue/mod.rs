//! Relay Queue Client
//!
//! Hands relay events to a durable queue with a dedup key. The queue layer
//! collapses identical dedup keys within its dedup window, which protects
//! downstream consumers even when the pipeline enqueues the same event twice.
//!
//! Enqueue failures are returned as-is. There is no retry here: the sender's
//! redelivery is the retry mechanism.

mod memory;
mod redis_stream;

pub use self::memory::MemoryRelayQueue;
pub use self::redis_stream::{RedisRelayQueue, MESSAGE_FIELD};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default dedup window, long enough to cover watcher redelivery
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(3600);

/// Errors that can occur while handing off a message
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// Message format delivered downstream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    /// Dedup key, equal to the relay event id
    pub dedup_key: String,
    /// Notification body exactly as received
    pub body: String,
    /// Unix timestamp in milliseconds when the message was enqueued
    pub enqueued_at: u64,
}

impl QueuedMessage {
    /// Serialize the message to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a message from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Durable at-least-once queue with delivery-level deduplication
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayQueue: Send + Sync {
    /// Durably hand off `payload` under `dedup_key`
    ///
    /// A second call with the same key inside the dedup window succeeds
    /// without producing a second downstream message.
    async fn enqueue(&self, dedup_key: &str, payload: &str) -> Result<(), QueueError>;

    /// Window during which identical dedup keys are collapsed
    fn dedup_window(&self) -> Duration;
}
