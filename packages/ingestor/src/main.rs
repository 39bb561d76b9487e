use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_ingestor::dedup::{LockedDedupBackend, RedisKvStore};
use relay_ingestor::{
    build_router, AppState, DedupBackend, DedupMode, DedupStores, IngestionPipeline,
    RedisDedupBackend, RedisRelayQueue, RelayConfig, RelayQueue,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_ingestor=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env()?;

    let client = redis::Client::open(config.redis_url.as_str())?;
    let connection = client.get_multiplexed_async_connection().await?;

    let backend: Arc<dyn DedupBackend> = match config.dedup_mode {
        DedupMode::Conditional => Arc::new(RedisDedupBackend::new(
            connection.clone(),
            &config.dedup_table,
        )),
        DedupMode::Locked => Arc::new(LockedDedupBackend::new(RedisKvStore::new(
            connection.clone(),
            &config.dedup_table,
        ))),
    };
    let queue = Arc::new(RedisRelayQueue::new(
        connection,
        &config.queue_stream,
        config.dedup_window,
    ));

    info!(
        stream = %queue.stream(),
        dedup_window_secs = queue.dedup_window().as_secs(),
        "Relay queue ready"
    );

    let pipeline = IngestionPipeline::new(DedupStores::new(backend), queue);
    let app = build_router(AppState::new(pipeline)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(
        addr = %config.bind_addr,
        table = %config.dedup_table,
        mode = ?config.dedup_mode,
        "listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
