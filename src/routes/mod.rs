// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};

use crate::context::AppContext;
use crate::models::Sample;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) ctx: Arc<AppContext>,
    pub(crate) ingest_tx: mpsc::Sender<Sample>,
    pub(crate) live_tx: broadcast::Sender<Sample>,
    pub(crate) ws_live_connections: Arc<AtomicUsize>,
}

pub fn app(
    ctx: Arc<AppContext>,
    ingest_tx: mpsc::Sender<Sample>,
    live_tx: broadcast::Sender<Sample>,
    ws_live_connections: Arc<AtomicUsize>,
) -> Router {
    let state = AppState {
        ctx,
        ingest_tx,
        live_tx,
        ws_live_connections,
    };
    Router::new()
        .route("/", get(|| async { "powerhub: solar and battery monitor" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/samples", post(http::ingest_handler)) // POST /api/samples
        .route("/api/snapshot", get(http::snapshot_handler)) // GET /api/snapshot
        .route("/api/summary", get(http::summary_handler)) // GET /api/summary
        .route("/api/history/{metric}", get(http::history_handler)) // GET /api/history/{metric}
        .route("/api/daily", get(http::daily_handler)) // GET /api/daily
        .route("/api/peak/{metric}", get(http::peak_handler)) // GET /api/peak/{metric}
        .route("/api/alerts", get(http::alerts_handler)) // GET /api/alerts
        .route("/api/charger", get(http::charger_handler)) // GET /api/charger
        .route("/api/charger/{action}", post(http::manual_charger_handler)) // POST /api/charger/{on|off}
        .route("/ws/ingest", get(ws::ws_ingest)) // WS /ws/ingest
        .route("/ws/live", get(ws::ws_live)) // WS /ws/live
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
