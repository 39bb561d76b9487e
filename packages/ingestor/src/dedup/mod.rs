//! Dedup Store
//!
//! Records which relay events have already been handed to the queue.
//! One keyed mechanism ([`DedupBackend`]) is shared by two namespaced
//! [`DedupStore`]s, one per [`EventKind`], so transaction and message ids can
//! never collide in the shared keyspace.
//!
//! Records are write-once: nothing in this crate updates or deletes them.

mod locked;
mod memory;
mod redis_backend;

pub use self::locked::{KvStore, LockedDedupBackend};
pub use self::memory::MemoryDedupBackend;
pub use self::redis_backend::{RedisDedupBackend, RedisKvStore};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::event::{current_timestamp_millis, EventKind};

/// Errors raised by the persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Dedup store unavailable: {0}")]
    Unavailable(String),
}

/// Result of recording an id
#[derive(Error, Debug)]
pub enum RecordError {
    /// Another request recorded this id first. This is the expected outcome
    /// of a concurrent duplicate delivery, not a failure.
    #[error("Dedup record already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a conditional insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// A persisted "this event id has been relayed" marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupRecord {
    /// Primary key, equal to `RelayEvent::id`
    pub id: String,
    /// Unix timestamp in milliseconds of the first successful recording
    pub created_at: u64,
}

/// Keyed existence store with an atomic create-if-absent
///
/// Keys are opaque; namespacing is applied by [`DedupStore`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DedupBackend: Send + Sync {
    /// Returns whether a record exists for `key`
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Creates the record for `key` unless one already exists
    async fn insert_if_absent(&self, key: &str, created_at: u64)
        -> Result<InsertOutcome, StoreError>;
}

/// A dedup store scoped to one event kind
#[derive(Clone)]
pub struct DedupStore {
    backend: Arc<dyn DedupBackend>,
    kind: EventKind,
}

impl DedupStore {
    /// Create a store that prefixes every key with the namespace of `kind`
    pub fn new(backend: Arc<dyn DedupBackend>, kind: EventKind) -> Self {
        Self { backend, kind }
    }

    /// Get the kind this store is scoped to
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Get the namespaced key for a canonical hash
    pub fn key(&self, hash: &str) -> String {
        self.kind.dedup_key(hash)
    }

    /// Check whether `hash` has already been relayed
    pub async fn has(&self, hash: &str) -> Result<bool, StoreError> {
        self.backend.exists(&self.key(hash)).await
    }

    /// Record `hash` as relayed
    ///
    /// # Returns
    /// `Err(RecordError::AlreadyExists)` if another caller recorded it first
    pub async fn record(&self, hash: &str) -> Result<(), RecordError> {
        let key = self.key(hash);
        match self
            .backend
            .insert_if_absent(&key, current_timestamp_millis())
            .await?
        {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::AlreadyExists => Err(RecordError::AlreadyExists(key)),
        }
    }
}

/// The transaction-keyed and message-keyed stores over one backend
#[derive(Clone)]
pub struct DedupStores {
    transactions: DedupStore,
    messages: DedupStore,
}

impl DedupStores {
    /// Instantiate both namespaced stores over a shared backend
    pub fn new(backend: Arc<dyn DedupBackend>) -> Self {
        Self {
            transactions: DedupStore::new(backend.clone(), EventKind::Transaction),
            messages: DedupStore::new(backend, EventKind::Message),
        }
    }

    /// Get the store for an event kind
    pub fn for_kind(&self, kind: EventKind) -> &DedupStore {
        match kind {
            EventKind::Transaction => &self.transactions,
            EventKind::Message => &self.messages,
        }
    }

    pub fn transactions(&self) -> &DedupStore {
        &self.transactions
    }

    pub fn messages(&self) -> &DedupStore {
        &self.messages
    }
}
