//! Redis Integration Tests
//!
//! These tests require Redis at localhost:6379.
//! They are marked with #[ignore] by default for CI environments.
//!
//! To run these tests:
//! 1. Start Redis: `docker run -d -p 6379:6379 redis:alpine`
//! 2. Run tests: `cargo test --test redis_integration -- --ignored`

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::AsyncCommands;
use serde_json::json;

use relay_ingestor::dedup::{
    DedupBackend, DedupStores, InsertOutcome, LockedDedupBackend, RedisDedupBackend, RedisKvStore,
};
use relay_ingestor::pipeline::{IngestionPipeline, Outcome};
use relay_ingestor::queue::{QueuedMessage, RedisRelayQueue, RelayQueue, MESSAGE_FIELD};

const REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Create a Redis connection
async fn get_redis_connection() -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
    let client = redis::Client::open(REDIS_URL)?;
    client.get_multiplexed_async_connection().await
}

/// Unique prefix so runs do not see each other's keys
fn unique(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("relay-test-{}-{}", name, nanos)
}

// ==================== Dedup backend ====================

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_set_nx_conflicts_on_second_insert() {
    let conn = get_redis_connection().await.expect("Failed to connect to Redis");
    let backend = RedisDedupBackend::new(conn, unique("dedup"));

    assert!(!backend.exists("Transaction:0xabc").await.unwrap());
    assert_eq!(
        backend.insert_if_absent("Transaction:0xabc", 1).await.unwrap(),
        InsertOutcome::Inserted
    );
    assert_eq!(
        backend.insert_if_absent("Transaction:0xabc", 2).await.unwrap(),
        InsertOutcome::AlreadyExists
    );
    assert!(backend.exists("Transaction:0xabc").await.unwrap());
}

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_locked_mode_over_plain_kv() {
    let conn = get_redis_connection().await.expect("Failed to connect to Redis");
    let backend = LockedDedupBackend::new(RedisKvStore::new(conn, unique("locked")));

    assert_eq!(
        backend.insert_if_absent("Message:0xabc", 1).await.unwrap(),
        InsertOutcome::Inserted
    );
    assert_eq!(
        backend.insert_if_absent("Message:0xabc", 2).await.unwrap(),
        InsertOutcome::AlreadyExists
    );
}

// ==================== Relay queue ====================

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_stream_collapses_duplicate_dedup_keys() {
    let mut conn = get_redis_connection().await.expect("Failed to connect to Redis");
    let stream = unique("queue");
    let queue = RedisRelayQueue::new(conn.clone(), &stream, Duration::from_secs(60));

    queue.enqueue("Transaction:0xabc", r#"{"hash":"0xabc"}"#).await.unwrap();
    queue.enqueue("Transaction:0xabc", r#"{"hash":"0xabc"}"#).await.unwrap();
    queue.enqueue("Message:0xabc", r#"{"hash":"0xabc"}"#).await.unwrap();

    let len: usize = conn.xlen(&stream).await.unwrap();
    assert_eq!(len, 2);
}

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_stream_entry_is_queued_message_json() {
    let mut conn = get_redis_connection().await.expect("Failed to connect to Redis");
    let stream = unique("wire");
    let queue = RedisRelayQueue::new(conn.clone(), &stream, Duration::from_secs(60));
    let payload = r#"{"hash":"0xabc","value":123456789012345678901234567890}"#;

    queue.enqueue("Transaction:0xabc", payload).await.unwrap();

    let entries: Vec<(String, Vec<String>)> = redis::cmd("XRANGE")
        .arg(&stream)
        .arg("-")
        .arg("+")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);

    let fields = &entries[0].1;
    let at = fields.iter().position(|f| f == MESSAGE_FIELD).unwrap();
    let message = QueuedMessage::from_json(&fields[at + 1]).unwrap();
    assert_eq!(message.dedup_key, "Transaction:0xabc");
    assert_eq!(message.body, payload);
}

// ==================== Full pipeline ====================

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_pipeline_relays_once_over_redis() {
    let mut conn = get_redis_connection().await.expect("Failed to connect to Redis");
    let stream = unique("pipeline-queue");
    let backend = Arc::new(RedisDedupBackend::new(conn.clone(), unique("pipeline-dedup")));
    let queue = Arc::new(RedisRelayQueue::new(conn.clone(), &stream, Duration::from_secs(60)));
    let pipeline = IngestionPipeline::new(DedupStores::new(backend), queue);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            pipeline.process(json!({"hash": "0xabc", "kind": "Transaction"})).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    assert!(matches!(
        pipeline.process(json!({"hash": "0xabc"})).await,
        Outcome::Duplicate
    ));

    let len: usize = conn.xlen(&stream).await.unwrap();
    assert_eq!(len, 1);
}
