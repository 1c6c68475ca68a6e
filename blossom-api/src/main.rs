//! Blossom daemon entry point.
//!
//! Connects the backends, starts the hot-ranking and index-sync jobs, and
//! runs until ctrl-c. On shutdown the jobs are signalled, then in-flight
//! background tasks are drained within the configured deadline.

use std::sync::Arc;

use blossom_api::jobs::{hot_ranking_task, index_sync_task};
use blossom_api::telemetry::{init_tracing, METRICS};
use blossom_api::{
    ApiError, ApiResult, AppState, Backends, BlossomConfig, DbClient, ElasticSearchIndex,
    RedisCoordinationStore, RedisStreamChangeSource,
};
use blossom_core::IdGenerator;
use blossom_storage::{ChangeEventSource, SearchIndex};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = BlossomConfig::from_env();
    init_tracing(&config.telemetry)?;
    config
        .validate()
        .map_err(|e| ApiError::invalid_input(format!("Invalid configuration: {}", e)))?;

    if config.telemetry.metrics_enabled {
        if let Err(e) = METRICS.as_ref() {
            tracing::warn!(error = %e, "Metrics registration failed, continuing without metrics");
        }
    }

    let ids = Arc::new(
        IdGenerator::new(config.machine_id)
            .map_err(|e| ApiError::invalid_input(format!("Invalid machine id: {}", e)))?,
    );

    let db = DbClient::from_config(&config.db)?;
    db.apply_schema().await?;

    let redis = RedisCoordinationStore::connect(&config.redis).await?;
    let change_source =
        RedisStreamChangeSource::connect(&config.redis, config.change_feed.clone()).await?;

    let index = ElasticSearchIndex::new(&config.search)?;
    index.ensure_index().await.map_err(blossom_core::BlossomError::from)?;

    let state = AppState::new(
        &config,
        ids,
        Backends {
            records: Arc::new(db),
            coordination: Arc::new(redis),
            index: Arc::new(index),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ranking_handle = tokio::spawn(hot_ranking_task(
        Arc::clone(&state.ranking_job),
        config.hot_ranking.clone(),
        shutdown_rx.clone(),
    ));
    let source: Arc<dyn ChangeEventSource> = Arc::new(change_source);
    let sync_handle = tokio::spawn(index_sync_task(
        Arc::clone(&state.sync),
        source,
        config.index_sync.clone(),
        shutdown_rx,
    ));

    tracing::info!(machine_id = config.machine_id, "Blossom started");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to listen for ctrl-c: {}", e)))?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    for (name, result) in [
        ("hot_ranking", ranking_handle.await.map(|_| ())),
        ("index_sync", sync_handle.await.map(|_| ())),
    ] {
        if let Err(e) = result {
            tracing::error!(job = name, error = %e, "Job ended abnormally");
        }
    }

    if !state.background.drain_with_timeout(config.drain_timeout).await {
        tracing::warn!(
            in_flight = state.background.in_flight(),
            "Background tasks still running at shutdown deadline"
        );
    }
    tracing::info!(
        uptime_secs = state.start_time.elapsed().as_secs(),
        background_failures = state.background.failures(),
        "Blossom stopped"
    );
    Ok(())
}
