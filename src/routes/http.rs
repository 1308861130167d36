// HTTP handlers: ingestion, read API, manual charger control

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::AppState;
use crate::control_loop::{ControlOutcome, Veto};
use crate::models::{ControlAction, DailyStats, IncomingSample, Sample};

/// One sample or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum IngestBody {
    One(IncomingSample),
    Many(Vec<IncomingSample>),
}

impl IngestBody {
    pub(super) fn into_samples(self, received_at: DateTime<Utc>) -> Vec<Sample> {
        match self {
            IngestBody::One(s) => vec![s.into_sample(received_at)],
            IngestBody::Many(v) => v.into_iter().map(|s| s.into_sample(received_at)).collect(),
        }
    }
}

/// Queues samples for the ingestion worker. Returns how many were accepted.
pub(super) async fn enqueue(state: &AppState, samples: Vec<Sample>) -> Result<usize, usize> {
    let mut accepted = 0;
    for sample in samples {
        if state.ingest_tx.send(sample).await.is_err() {
            return Err(accepted);
        }
        accepted += 1;
    }
    Ok(accepted)
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// GET /version
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /api/samples
pub(super) async fn ingest_handler(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Response {
    let samples = body.into_samples(Utc::now());
    match enqueue(&state, samples).await {
        Ok(accepted) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "accepted": accepted })),
        )
            .into_response(),
        Err(accepted) => {
            tracing::warn!(accepted, "ingest channel closed");
            error(StatusCode::SERVICE_UNAVAILABLE, "ingestion is shutting down")
        }
    }
}

/// GET /api/snapshot: latest sample per metric.
pub(super) async fn snapshot_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot: BTreeMap<_, _> = state.ctx.cache.snapshot().await.into_iter().collect();
    Json(snapshot)
}

/// GET /api/summary
pub(super) async fn summary_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ctx.summary().await)
}

#[derive(Debug, Deserialize)]
pub(super) struct RangeQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

/// GET /api/history/{metric}?from=&to= (defaults to the last 24 hours)
pub(super) async fn history_handler(
    State(state): State<AppState>,
    Path(metric): Path<String>,
    Query(range): Query<RangeQuery>,
) -> Response {
    if !state.ctx.archive.is_tracked(&metric) {
        return error(StatusCode::NOT_FOUND, format!("metric {} is not archived", metric));
    }
    let to = range.to.unwrap_or_else(Utc::now);
    let from = range.from.unwrap_or(to - Duration::hours(24));
    if from > to {
        return error(StatusCode::BAD_REQUEST, "from must not be after to");
    }
    Json(state.ctx.archive.query(&metric, from, to).await).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DailyReport {
    stats: DailyStats,
    /// kWh per cumulative metric.
    energy_kwh: BTreeMap<String, f64>,
}

/// GET /api/daily
pub(super) async fn daily_handler(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    Json(DailyReport {
        stats: state.ctx.analytics.stats().await,
        energy_kwh: state.ctx.daily_energy_report(now).await,
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct SinceQuery {
    since: Option<DateTime<Utc>>,
}

/// GET /api/peak/{metric}?since=
pub(super) async fn peak_handler(
    State(state): State<AppState>,
    Path(metric): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Response {
    if !state.ctx.archive.is_tracked(&metric) {
        return error(StatusCode::NOT_FOUND, format!("metric {} is not archived", metric));
    }
    let peak = state
        .ctx
        .analytics
        .peak_power(&metric, query.since, &state.ctx.archive)
        .await;
    Json(peak).into_response()
}

/// GET /api/alerts: newest first.
pub(super) async fn alerts_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ctx.alerts.history().await)
}

/// GET /api/charger
pub(super) async fn charger_handler(State(state): State<AppState>) -> impl IntoResponse {
    let ctx = &state.ctx;
    Json(serde_json::json!({
        "armed": ctx.control.settings().armed,
        "state": ctx.control.state().await,
        "peakDischarge": ctx.peak_discharge.state().await,
    }))
}

/// POST /api/charger/{on|off}
pub(super) async fn manual_charger_handler(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> Response {
    let action = match action.to_ascii_lowercase().as_str() {
        "on" => ControlAction::On,
        "off" => ControlAction::Off,
        other => {
            return error(
                StatusCode::BAD_REQUEST,
                format!("unknown charger action {:?}, expected on or off", other),
            );
        }
    };
    match state.ctx.manual_charger(action, Utc::now()).await {
        Ok(ControlOutcome::Switched { state, .. }) => Json(state).into_response(),
        Ok(ControlOutcome::Failed { error: e, .. }) => {
            error(StatusCode::BAD_GATEWAY, format!("charger trigger failed: {}", e))
        }
        Err(veto) => match veto {
            Veto::Disarmed => error(
                StatusCode::CONFLICT,
                "charger automation is disabled or has no webhook key",
            ),
            Veto::InFlight => error(StatusCode::CONFLICT, "a charger action is already in flight"),
            other => error(StatusCode::CONFLICT, format!("charger action refused: {:?}", other)),
        },
    }
}
