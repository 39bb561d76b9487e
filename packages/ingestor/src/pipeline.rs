//! Ingestion Pipeline
//!
//! Normalize → check → enqueue → record, per notification.
//!
//! The event is enqueued before it is recorded. A crash between the two steps
//! can only produce a duplicate enqueue, which the queue's dedup key absorbs;
//! recording first could silently drop the event. There is no retry loop and
//! no concurrency limit here: a `Failed` outcome tells the sender to redeliver.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::dedup::{DedupStores, RecordError, StoreError};
use crate::event::{normalize, NormalizationError, Notification, RelayEvent};
use crate::queue::{QueueError, RelayQueue};

/// Per-request pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Normalized,
    Checked,
    Enqueued,
    Recorded,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Normalized => "normalized",
            Stage::Checked => "checked",
            Stage::Enqueued => "enqueued",
            Stage::Recorded => "recorded",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Infrastructure failures
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Dedup store error: {0}")]
    Store(#[from] StoreError),

    #[error("Relay queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Result of processing one notification
#[derive(Debug)]
pub enum Outcome {
    /// Newly relayed to the queue and recorded
    Relayed,
    /// Already relayed, or a concurrent delivery recorded it first
    Duplicate,
    /// Malformed notification; not retried
    Rejected(NormalizationError),
    /// Infrastructure error at `stage`; the sender should redeliver.
    /// A failure at `Stage::Recorded` means the message was already enqueued.
    Failed { stage: Stage, error: PipelineError },
}

impl Outcome {
    /// Relayed and duplicate are both success from the sender's point of view
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Relayed | Outcome::Duplicate)
    }
}

/// Outcome counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    relayed: AtomicU64,
    duplicate: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub relayed: u64,
    pub duplicate: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl PipelineStats {
    fn observe(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Relayed => &self.relayed,
            Outcome::Duplicate => &self.duplicate,
            Outcome::Rejected(_) => &self.rejected,
            Outcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            relayed: self.relayed.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Ingestion pipeline over a dedup store and a relay queue
///
/// Cheap to clone; clones share the store, queue and counters.
#[derive(Clone)]
pub struct IngestionPipeline {
    stores: DedupStores,
    queue: Arc<dyn RelayQueue>,
    stats: Arc<PipelineStats>,
}

impl IngestionPipeline {
    pub fn new(stores: DedupStores, queue: Arc<dyn RelayQueue>) -> Self {
        Self {
            stores,
            queue,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stores(&self) -> &DedupStores {
        &self.stores
    }

    /// Process one notification
    ///
    /// Safe to call repeatedly and concurrently for the same notification.
    pub async fn process(&self, notification: impl Into<Notification>) -> Outcome {
        let outcome = match normalize(notification) {
            Ok(event) => self.relay(event).await,
            Err(reason) => {
                warn!(reason = %reason, stage = %Stage::Received, "Rejected notification");
                Outcome::Rejected(reason)
            }
        };
        self.stats.observe(&outcome);
        outcome
    }

    /// Relay an already normalized event
    async fn relay(&self, event: RelayEvent) -> Outcome {
        debug!(event_id = %event.id, kind = %event.kind, stage = %Stage::Normalized, "Normalized notification");
        let store = self.stores.for_kind(event.kind);

        match store.has(&event.hash).await {
            Ok(true) => {
                debug!(event_id = %event.id, "Already relayed");
                return Outcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => return failed(&event, Stage::Checked, e.into()),
        }

        if let Err(e) = self.queue.enqueue(&event.id, &event.payload).await {
            return failed(&event, Stage::Enqueued, e.into());
        }

        match store.record(&event.hash).await {
            Ok(()) => {}
            Err(RecordError::AlreadyExists(_)) => {
                debug!(event_id = %event.id, "Concurrent delivery recorded first");
                return Outcome::Duplicate;
            }
            Err(RecordError::Store(e)) => return failed(&event, Stage::Recorded, e.into()),
        }

        info!(event_id = %event.id, kind = %event.kind, stage = %Stage::Done, "Relayed event");
        Outcome::Relayed
    }
}

fn failed(event: &RelayEvent, stage: Stage, error: PipelineError) -> Outcome {
    if stage == Stage::Recorded {
        error!(event_id = %event.id, stage = %stage, error = %error, "Enqueued but not recorded; redelivery will be absorbed by the queue dedup window");
    } else {
        error!(event_id = %event.id, stage = %stage, error = %error, "Relay failed");
    }
    Outcome::Failed { stage, error }
}
