//! HTTP gateway for watcher webhooks.
//!
//! # Endpoints
//!
//! - `POST /webhook` - Relay a notification (200 on relay or duplicate)
//! - `GET /stats` - Pipeline outcome counters
//! - `GET /health` - Returns 200 if the server is running

pub mod health;
pub mod webhook;

pub use health::{health_handler, stats_handler};
pub use webhook::{outcome_response, webhook_handler, GatewayError};

use std::sync::Arc;

use crate::pipeline::IngestionPipeline;

/// Shared application state.
///
/// Passed to all handlers via Axum's `State` extractor. Holds no mutable
/// request state; the dedup store is the only shared resource.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pipeline: IngestionPipeline,
}

impl AppState {
    pub fn new(pipeline: IngestionPipeline) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { pipeline }),
        }
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.inner.pipeline
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
