use anyhow::Result;
use chrono::Utc;
use powerhub::*;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

/// Opens the archive database. Storage trouble degrades to an in-memory archive.
async fn open_archive(path: &str) -> Option<archive_repo::ArchiveDb> {
    let db = match archive_repo::ArchiveDb::connect(path).await {
        Ok(db) => db,
        Err(e) => {
            tracing::warn!(error = %e, path, "archive database unavailable; archive is in-memory only");
            return None;
        }
    };
    if let Err(e) = db.init().await {
        tracing::warn!(error = %e, path, "archive schema init failed; archive is in-memory only");
        return None;
    }
    Some(db)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let archive_db = open_archive(&app_config.storage.archive_db_path).await;
    let ctx = context::AppContext::build(
        app_config.clone(),
        context::Collaborators {
            actuator: notifier::build_actuator(&app_config.charger)?,
            notifier: notifier::build_notifier(&app_config.notifications)?,
            state_store: Some(state_store::StateStore::new(&app_config.storage.state_path)),
            archive_db,
        },
        Utc::now(),
    )
    .await;

    let (ingest_tx, ingest_rx) = mpsc::channel::<models::Sample>(app_config.server.ingest_channel_capacity);
    let (live_tx, _) = broadcast::channel::<models::Sample>(app_config.server.broadcast_capacity);
    let ws_live_connections = Arc::new(AtomicUsize::new(0));
    let (ingest_shutdown_tx, ingest_shutdown_rx) = tokio::sync::oneshot::channel();
    let (maintenance_shutdown_tx, maintenance_shutdown_rx) = tokio::sync::oneshot::channel();

    let ingest_handle = worker::spawn(worker::WorkerDeps {
        ctx: ctx.clone(),
        ingest_rx,
        live_tx: live_tx.clone(),
        shutdown_rx: ingest_shutdown_rx,
    });
    let maintenance_handle = worker::spawn_maintenance(
        ctx.clone(),
        ws_live_connections.clone(),
        worker::MaintenanceConfig {
            persist_interval_secs: app_config.storage.persist_interval_secs,
            stats_log_interval_secs: app_config.monitoring.stats_log_interval_secs,
        },
        maintenance_shutdown_rx,
    );
    let _summary_handle = summary_worker::spawn(
        ctx.clone(),
        summary_worker::SummaryWorkerConfig {
            enabled: app_config.summary.enabled,
            schedule: app_config.summary.schedule.clone(),
        },
    );

    let app = routes::app(ctx, ingest_tx, live_tx, ws_live_connections);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
    }

    // Stop ingestion first so the final persist sees every processed sample.
    let _ = ingest_shutdown_tx.send(());
    let _ = ingest_handle.await;
    let _ = maintenance_shutdown_tx.send(());
    let _ = maintenance_handle.await;

    Ok(())
}
