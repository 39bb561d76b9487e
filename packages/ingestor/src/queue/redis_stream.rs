//! Redis Streams relay queue
//!
//! Appends relay messages to a stream. A guard key per dedup key, set with
//! `NX EX <window>`, collapses repeated enqueues inside the dedup window. The
//! guard and the append run in one Lua script so they cannot be split.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::time::Duration;
use tracing::debug;

use super::{QueueError, QueuedMessage, RelayQueue};
use crate::event::current_timestamp_millis;

/// Stream entry field holding the serialized [`QueuedMessage`]
pub const MESSAGE_FIELD: &str = "message";

/// KEYS[1] = guard key, KEYS[2] = stream
/// ARGV[1] = dedup key, ARGV[2] = window seconds, ARGV[3] = message JSON
const ENQUEUE_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], '1', 'NX', 'EX', ARGV[2]) then
  redis.call('XADD', KEYS[2], '*', 'dedupKey', ARGV[1], 'message', ARGV[3])
  return 1
end
return 0
"#;

/// Build the guard key that marks `dedup_key` as enqueued on `stream`
pub fn guard_key(stream: &str, dedup_key: &str) -> String {
    format!("{}:dedup:{}", stream, dedup_key)
}

/// Relay queue backed by a Redis stream
#[derive(Clone)]
pub struct RedisRelayQueue {
    connection: MultiplexedConnection,
    stream: String,
    window: Duration,
    script: Script,
}

impl RedisRelayQueue {
    /// Create a queue writing to `stream`
    ///
    /// # Arguments
    /// * `connection` - An established Redis multiplexed connection
    /// * `stream` - Queue destination (stream key)
    /// * `window` - Dedup window; sub-second windows round up to one second
    pub fn new(connection: MultiplexedConnection, stream: impl Into<String>, window: Duration) -> Self {
        Self {
            connection,
            stream: stream.into(),
            window,
            script: Script::new(ENQUEUE_SCRIPT),
        }
    }

    /// Get the stream name
    pub fn stream(&self) -> &str {
        &self.stream
    }

    fn window_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}

/// Build the stream entry body for `payload`
fn encode_message(dedup_key: &str, payload: &str) -> Result<String, QueueError> {
    let message = QueuedMessage {
        dedup_key: dedup_key.to_string(),
        body: payload.to_string(),
        enqueued_at: current_timestamp_millis(),
    };
    Ok(message.to_json()?)
}

#[async_trait]
impl RelayQueue for RedisRelayQueue {
    async fn enqueue(&self, dedup_key: &str, payload: &str) -> Result<(), QueueError> {
        let message = encode_message(dedup_key, payload)?;
        let mut conn = self.connection.clone();
        let appended: i64 = self
            .script
            .key(guard_key(&self.stream, dedup_key))
            .key(&self.stream)
            .arg(dedup_key)
            .arg(self.window_secs())
            .arg(message)
            .invoke_async(&mut conn)
            .await?;

        if appended == 0 {
            debug!(dedup_key = %dedup_key, stream = %self.stream, "Enqueue collapsed by dedup window");
        }
        Ok(())
    }

    fn dedup_window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_key_format() {
        assert_eq!(
            guard_key("relay-queue", "Transaction:0xabc"),
            "relay-queue:dedup:Transaction:0xabc"
        );
    }

    #[test]
    fn test_script_guards_before_append() {
        let set_at = ENQUEUE_SCRIPT.find("'SET'").unwrap();
        let xadd_at = ENQUEUE_SCRIPT.find("'XADD'").unwrap();
        assert!(set_at < xadd_at);
        assert!(ENQUEUE_SCRIPT.contains("'NX'"));
        assert!(ENQUEUE_SCRIPT.contains(&format!("'{}'", MESSAGE_FIELD)));
    }

    #[test]
    fn test_encoded_message_carries_body_verbatim() {
        let payload = r#"{"hash":"0xabc","value":123456789012345678901234567890}"#;
        let json = encode_message("Transaction:0xabc", payload).unwrap();

        let message = QueuedMessage::from_json(&json).unwrap();
        assert_eq!(message.dedup_key, "Transaction:0xabc");
        assert_eq!(message.body, payload);
        assert!(message.enqueued_at > 0);
    }
}
