//! In-memory dedup backend, used by tests and local runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{DedupBackend, DedupRecord, InsertOutcome, StoreError};

/// Process-local dedup backend with an atomic create-if-absent
#[derive(Debug, Default)]
pub struct MemoryDedupBackend {
    records: RwLock<HashMap<String, u64>>,
    fail_inserts: AtomicUsize,
    fail_lookups: AtomicUsize,
}

impl MemoryDedupBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` inserts fail with `StoreError::Unavailable`
    pub fn fail_next_inserts(&self, count: usize) {
        self.fail_inserts.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` existence checks fail with `StoreError::Unavailable`
    pub fn fail_next_lookups(&self, count: usize) {
        self.fail_lookups.store(count, Ordering::SeqCst);
    }

    /// Get the record stored under `key`, if any
    pub async fn record(&self, key: &str) -> Option<DedupRecord> {
        self.records.read().await.get(key).map(|created_at| DedupRecord {
            id: key.to_string(),
            created_at: *created_at,
        })
    }

    /// Number of records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// Decrement a failure budget, returning true if this call should fail
fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl DedupBackend for MemoryDedupBackend {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        if take_failure(&self.fail_lookups) {
            return Err(StoreError::Unavailable("injected lookup failure".to_string()));
        }
        Ok(self.records.read().await.contains_key(key))
    }

    async fn insert_if_absent(
        &self,
        key: &str,
        created_at: u64,
    ) -> Result<InsertOutcome, StoreError> {
        if take_failure(&self.fail_inserts) {
            return Err(StoreError::Unavailable("injected insert failure".to_string()));
        }

        let mut records = self.records.write().await;
        if records.contains_key(key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        records.insert(key.to_string(), created_at);
        Ok(InsertOutcome::Inserted)
    }
}
