//! Degraded dedup mode for stores without a conditional write.
//!
//! Check-then-write is serialized per key with an async mutex. This only
//! excludes concurrent duplicates handled by the same process; across
//! processes the relay queue's dedup window is the remaining protection.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::{DedupBackend, InsertOutcome, StoreError};

/// Key-value store offering only unconditional reads and writes
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;

    async fn put(&self, key: &str, value: u64) -> Result<(), StoreError>;
}

/// Dedup backend that serializes inserts per key over a plain [`KvStore`]
pub struct LockedDedupBackend<K> {
    store: K,
    locks: LockMap,
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

impl<K: KvStore> LockedDedupBackend<K> {
    pub fn new(store: K) -> Self {
        warn!("Dedup store has no conditional write; using per-id locking (single-process only)");
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for<'a>(&'a self, key: &'a str) -> KeyLock<'a> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks.entry(key.to_string()).or_default().clone();
        KeyLock {
            locks: &self.locks,
            key,
            lock,
        }
    }

    /// Number of keys with a live lock entry
    pub fn pending_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Handle on a per-key lock entry
///
/// Dropping it removes the entry once no other caller holds or awaits the
/// lock, including when the insert future is cancelled mid-flight.
struct KeyLock<'a> {
    locks: &'a LockMap,
    key: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // one reference in the map, one held here
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(self.key);
        }
    }
}

#[async_trait]
impl<K: KvStore> DedupBackend for LockedDedupBackend<K> {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.store.get(key).await?.is_some())
    }

    async fn insert_if_absent(
        &self,
        key: &str,
        created_at: u64,
    ) -> Result<InsertOutcome, StoreError> {
        let entry = self.lock_for(key);
        let _guard = entry.lock.lock().await;
        match self.store.get(key).await? {
            Some(_) => Ok(InsertOutcome::AlreadyExists),
            None => {
                self.store.put(key, created_at).await?;
                Ok(InsertOutcome::Inserted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Plain map store that yields between read and write to widen races
    #[derive(Default)]
    struct SlowKv {
        values: tokio::sync::RwLock<HashMap<String, u64>>,
    }

    #[async_trait]
    impl KvStore for SlowKv {
        async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
            let value = self.values.read().await.get(key).copied();
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(value)
        }

        async fn put(&self, key: &str, value: u64) -> Result<(), StoreError> {
            self.values.write().await.insert(key.to_string(), value);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sequential_insert_conflicts() {
        let backend = LockedDedupBackend::new(SlowKv::default());
        assert_eq!(
            backend.insert_if_absent("k", 1).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            backend.insert_if_absent("k", 2).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert!(backend.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_inserts_have_single_winner() {
        let backend = Arc::new(LockedDedupBackend::new(SlowKv::default()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend.insert_if_absent("k", i).await.unwrap()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }

    /// Store whose reads never complete
    struct StalledKv;

    #[async_trait]
    impl KvStore for StalledKv {
        async fn get(&self, _key: &str) -> Result<Option<u64>, StoreError> {
            std::future::pending().await
        }

        async fn put(&self, _key: &str, _value: u64) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_insert_releases_lock() {
        let backend = LockedDedupBackend::new(StalledKv);

        let timed_out =
            tokio::time::timeout(Duration::from_secs(1), backend.insert_if_absent("k", 1)).await;

        assert!(timed_out.is_err());
        assert_eq!(backend.pending_locks(), 0);
    }

    #[tokio::test]
    async fn test_locks_are_released() {
        let backend = LockedDedupBackend::new(SlowKv::default());
        backend.insert_if_absent("a", 1).await.unwrap();
        backend.insert_if_absent("b", 1).await.unwrap();
        assert_eq!(backend.pending_locks(), 0);
    }
}
