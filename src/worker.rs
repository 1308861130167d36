// Background workers.
// Ingestion drains the sample channel one sample at a time; maintenance prunes and persists on
// its own timer so storage writes never hold up ingestion.

use crate::context::AppContext;
use crate::models::Sample;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Duration, Instant, interval};

/// Rate limit for the "no live clients" debug line.
const NO_RECEIVERS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Context, channels, and shutdown for the ingestion worker.
pub struct WorkerDeps {
    pub ctx: Arc<AppContext>,
    pub ingest_rx: mpsc::Receiver<Sample>,
    pub live_tx: broadcast::Sender<Sample>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

/// Maintenance timing. Both intervals are real seconds.
pub struct MaintenanceConfig {
    pub persist_interval_secs: u64,
    pub stats_log_interval_secs: u64,
}

/// Spawns the ingestion worker. Samples are processed in arrival order, then fanned out to live
/// clients. Exits when every sender is gone or on shutdown.
pub fn spawn(deps: WorkerDeps) -> tokio::task::JoinHandle<()> {
    let WorkerDeps {
        ctx,
        mut ingest_rx,
        live_tx,
        mut shutdown_rx,
    } = deps;

    tokio::spawn(async move {
        let mut last_no_receivers_log: Option<Instant> = None;

        loop {
            tokio::select! {
                received = ingest_rx.recv() => {
                    let Some(sample) = received else {
                        tracing::debug!("ingest channel closed");
                        break;
                    };
                    // Outbound calls run detached; the handles are not awaited here.
                    let _tasks = ctx.ingest(sample.clone(), Utc::now()).await;

                    if live_tx.send(sample).is_err() {
                        let should_log = last_no_receivers_log
                            .is_none_or(|t| t.elapsed() >= NO_RECEIVERS_LOG_INTERVAL);
                        if should_log {
                            tracing::debug!(
                                operation = "broadcast_sample",
                                "No live WebSocket clients; broadcast channel has no receivers"
                            );
                            last_no_receivers_log = Some(Instant::now());
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Ingestion worker shutting down");
                    break;
                }
            }
        }
    })
}

/// Spawns the maintenance worker: retention pruning plus archive and state persistence every
/// `persist_interval_secs`, and a periodic app-stats line. Persists once more on shutdown.
pub fn spawn_maintenance(
    ctx: Arc<AppContext>,
    ws_live_connections: Arc<AtomicUsize>,
    config: MaintenanceConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut persist_tick = interval(Duration::from_secs(config.persist_interval_secs));
        persist_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_log_tick = interval(Duration::from_secs(config.stats_log_interval_secs));
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of an interval completes immediately; nothing to persist yet.
        persist_tick.tick().await;

        let mut points_pruned_total: u64 = 0;

        loop {
            tokio::select! {
                _ = persist_tick.tick() => {
                    let now = Utc::now();
                    let pruned = ctx.prune(now).await;
                    points_pruned_total += pruned as u64;
                    ctx.persist_all(now).await;
                    tracing::debug!(operation = "persist", pruned, "Archive and state persisted");
                }
                _ = stats_log_tick.tick() => {
                    let cached_metrics = ctx.cache.len().await;
                    tracing::info!(
                        ws_live_clients = ws_live_connections.load(Ordering::Relaxed),
                        cached_metrics,
                        samples_ingested_total = ctx.samples_ingested_total(),
                        points_archived_total = ctx.archive.points_archived_total(),
                        points_pruned_total,
                        persists_total = ctx.persists_total(),
                        "app stats"
                    );
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Maintenance worker shutting down");
                    break;
                }
            }
        }

        ctx.persist_all(Utc::now()).await;
        tracing::info!("Final persist complete");
    })
}
