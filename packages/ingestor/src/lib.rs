//! Relay Ingestor Library
//!
//! This crate relays blockchain transaction and message notifications from an
//! upstream watcher into a durable queue exactly once per event id, even when
//! the watcher redelivers the same notification.

pub mod config;
pub mod dedup;
pub mod event;
pub mod gateway;
pub mod pipeline;
pub mod queue;

// Re-export commonly used types
pub use config::{ConfigError, DedupMode, RelayConfig};
pub use dedup::{DedupBackend, DedupStore, DedupStores, MemoryDedupBackend, RedisDedupBackend};
pub use event::{normalize, EventKind, NormalizationError, Notification, RelayEvent};
pub use gateway::{build_router, AppState};
pub use pipeline::{IngestionPipeline, Outcome, Stage};
pub use queue::{MemoryRelayQueue, RedisRelayQueue, RelayQueue};
