//! Redis dedup backend
//!
//! Records live under `<table>:<namespaced id>` with the creation timestamp as
//! value. `SET ... NX` gives the conditional create that makes concurrent
//! duplicate deliveries safe across processes.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use super::locked::KvStore;
use super::{DedupBackend, InsertOutcome, StoreError};

/// Build the Redis key for a dedup record
pub fn record_key(table: &str, key: &str) -> String {
    format!("{}:{}", table, key)
}

/// Dedup backend using `SET NX` on a Redis connection
#[derive(Clone)]
pub struct RedisDedupBackend {
    connection: MultiplexedConnection,
    table: String,
}

impl RedisDedupBackend {
    /// Create a backend over an established multiplexed connection
    ///
    /// # Arguments
    /// * `connection` - An established Redis multiplexed connection
    /// * `table` - Store table identity, used as key prefix
    pub fn new(connection: MultiplexedConnection, table: impl Into<String>) -> Self {
        Self {
            connection,
            table: table.into(),
        }
    }
}

#[async_trait]
impl DedupBackend for RedisDedupBackend {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let found: bool = conn.exists(record_key(&self.table, key)).await?;
        Ok(found)
    }

    async fn insert_if_absent(
        &self,
        key: &str,
        created_at: u64,
    ) -> Result<InsertOutcome, StoreError> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(record_key(&self.table, key))
            .arg(created_at)
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        Ok(match reply {
            Some(_) => InsertOutcome::Inserted,
            None => InsertOutcome::AlreadyExists,
        })
    }
}

/// Plain get/put view of the same table, for the degraded locked mode
#[derive(Clone)]
pub struct RedisKvStore {
    connection: MultiplexedConnection,
    table: String,
}

impl RedisKvStore {
    pub fn new(connection: MultiplexedConnection, table: impl Into<String>) -> Self {
        Self {
            connection,
            table: table.into(),
        }
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<u64> = conn.get(record_key(&self.table, key)).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: u64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(record_key(&self.table, key), value).await?;
        Ok(())
    }
}
