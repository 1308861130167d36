// Integration tests: HTTP and WebSocket endpoints backed by a running ingestion worker

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::Utc;
use common::{GatedActuator, RecordingActuator, RecordingNotifier, harness_with, test_config};
use powerhub::config::AppConfig;
use powerhub::context::{AppContext, Collaborators};
use powerhub::models::{ArchivePoint, ControlState, Sample};
use powerhub::{routes, worker};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::{broadcast, mpsc};

struct TestApp {
    ctx: Arc<AppContext>,
    actuator: Arc<RecordingActuator>,
    app: axum::Router,
    _shutdown: tokio::sync::oneshot::Sender<()>,
}

async fn test_app_with(config: AppConfig) -> TestApp {
    let h = harness_with(config, RecordingActuator::default(), None, None, Utc::now()).await;
    let (ingest_tx, ingest_rx) = mpsc::channel(64);
    let (live_tx, _) = broadcast::channel(16);
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    worker::spawn(worker::WorkerDeps {
        ctx: h.ctx.clone(),
        ingest_rx,
        live_tx: live_tx.clone(),
        shutdown_rx,
    });
    let app = routes::app(h.ctx.clone(), ingest_tx, live_tx, Arc::new(AtomicUsize::new(0)));
    TestApp {
        ctx: h.ctx,
        actuator: h.actuator,
        app,
        _shutdown: shutdown_tx,
    }
}

async fn test_app() -> TestApp {
    test_app_with(test_config()).await
}

/// Waits until the ingestion worker has cached `metric`.
async fn wait_for_metric(ctx: &AppContext, metric: &str) {
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
    while ctx.cache.get(metric).await.is_none() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            metric
        );
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_root_endpoint() {
    let t = test_app().await;
    let server = TestServer::new(t.app);
    let response = server.get("/").await;
    response.assert_status_ok();
    response.assert_text("powerhub: solar and battery monitor");
}

#[tokio::test]
async fn test_version_endpoint() {
    let t = test_app().await;
    let server = TestServer::new(t.app);
    let response = server.get("/version").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json.get("name").and_then(|v| v.as_str()), Some("powerhub"));
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_post_samples_reaches_snapshot_and_summary() {
    let t = test_app().await;
    let server = TestServer::new(t.app);

    let response = server
        .post("/api/samples")
        .json(&json!([
            { "metricKey": "solar_power", "value": 400.0 },
            { "metricKey": "load_power", "value": 150.0 },
            { "metricKey": "battery_soc", "value": "62.5" },
        ]))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    assert_eq!(response.json::<serde_json::Value>()["accepted"], 3);

    wait_for_metric(&t.ctx, "battery_soc").await;

    let snapshot: serde_json::Value = server.get("/api/snapshot").await.json();
    assert_eq!(snapshot["solar_power"]["value"], 400.0);
    assert_eq!(snapshot["battery_soc"]["value"], "62.5");

    let summary: serde_json::Value = server.get("/api/summary").await.json();
    assert_eq!(summary["soc"], 62.5);
    assert_eq!(summary["powerBalanceW"], 250.0);
    assert_eq!(summary["runtimeText"], "indefinite");
}

#[tokio::test]
async fn test_malformed_sample_is_rejected() {
    let t = test_app().await;
    let server = TestServer::new(t.app);
    let response = server
        .post("/api/samples")
        .json(&json!({ "value": 1.0 }))
        .expect_failure()
        .await;
    assert!(response.status_code().is_client_error());
}

#[tokio::test]
async fn test_history_and_peak() {
    let t = test_app().await;
    let server = TestServer::new(t.app);
    server
        .post("/api/samples")
        .json(&json!({ "metricKey": "solar_power", "value": 750.0 }))
        .await
        .assert_status(StatusCode::ACCEPTED);
    wait_for_metric(&t.ctx, "solar_power").await;

    let points: Vec<ArchivePoint> = server.get("/api/history/solar_power").await.json();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 750.0);

    let peak: serde_json::Value = server.get("/api/peak/solar_power").await.json();
    assert_eq!(peak["value"], 750.0);

    server
        .get("/api/history/not_a_metric")
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_daily_endpoint_lists_energy_metrics() {
    let t = test_app().await;
    let server = TestServer::new(t.app);
    let daily: serde_json::Value = server.get("/api/daily").await.json();
    assert!(daily["energyKwh"].get("solar_energy_today").is_some());
    assert!(daily["energyKwh"].get("load_energy_today").is_some());
    assert!(daily["stats"]["date"].is_string());
}

#[tokio::test]
async fn test_manual_charger_switch() {
    let t = test_app().await;
    let server = TestServer::new(t.app);

    let state: ControlState = server.post("/api/charger/on").await.json();
    assert!(state.is_on);
    assert_eq!(t.actuator.events(), vec!["battery_low"]);

    let charger: serde_json::Value = server.get("/api/charger").await.json();
    assert_eq!(charger["armed"], true);
    assert_eq!(charger["state"]["isOn"], true);

    let alerts: serde_json::Value = server.get("/api/alerts").await.json();
    assert_eq!(alerts[0]["kind"], "charger_on");

    server
        .post("/api/charger/toggle")
        .expect_failure()
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manual_charger_refused_when_disarmed() {
    let mut config = test_config();
    config.charger.enabled = false;
    let t = test_app_with(config).await;
    let server = TestServer::new(t.app);
    server
        .post("/api/charger/off")
        .expect_failure()
        .await
        .assert_status(StatusCode::CONFLICT);
    assert!(t.actuator.events().is_empty());
}

// --- WebSocket tests (require http_transport + ws feature) ---
// Receive until we get JSON of the wanted shape (server may send Ping first).

async fn receive_first_json_text<T: serde::de::DeserializeOwned>(
    ws: &mut axum_test::TestWebSocket,
) -> T {
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
    loop {
        let text = ws.receive_text().await;
        if let Ok(v) = serde_json::from_str::<T>(&text) {
            return v;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for JSON"
        );
    }
}

#[tokio::test]
async fn test_ws_ingest_feeds_ws_live() {
    let t = test_app().await;
    let server = TestServer::builder().http_transport().build(t.app);

    let mut live = server.get_websocket("/ws/live").await.into_websocket().await;
    let welcome: serde_json::Value = receive_first_json_text(&mut live).await;
    assert_eq!(welcome["type"], "snapshot");

    let mut ingest = server.get_websocket("/ws/ingest").await.into_websocket().await;
    ingest
        .send_text(json!({ "metricKey": "battery_voltage", "value": 13.1 }).to_string())
        .await;

    let received: Sample = receive_first_json_text(&mut live).await;
    assert_eq!(received.metric_key, "battery_voltage");
    assert_eq!(received.value.as_number(), Some(13.1));
    wait_for_metric(&t.ctx, "battery_voltage").await;
}

#[tokio::test]
async fn test_ws_ingest_reports_malformed_frames() {
    let t = test_app().await;
    let server = TestServer::builder().http_transport().build(t.app);
    let mut ingest = server.get_websocket("/ws/ingest").await.into_websocket().await;
    ingest.send_text("not json").await;
    let reply: serde_json::Value = receive_first_json_text(&mut ingest).await;
    assert!(reply["error"].as_str().unwrap().contains("malformed"));
}

#[tokio::test]
async fn test_charger_requests_conflict_while_trigger_pending() {
    let actuator = Arc::new(GatedActuator::default());
    let ctx = AppContext::build(
        test_config(),
        Collaborators {
            actuator: actuator.clone(),
            notifier: Arc::new(RecordingNotifier::default()),
            state_store: None,
            archive_db: None,
        },
        Utc::now(),
    )
    .await;
    let (ingest_tx, ingest_rx) = mpsc::channel(64);
    let (live_tx, _) = broadcast::channel(16);
    let (_shutdown, shutdown_rx) = tokio::sync::oneshot::channel();
    worker::spawn(worker::WorkerDeps {
        ctx: ctx.clone(),
        ingest_rx,
        live_tx: live_tx.clone(),
        shutdown_rx,
    });
    let server = TestServer::new(routes::app(
        ctx.clone(),
        ingest_tx,
        live_tx,
        Arc::new(AtomicUsize::new(0)),
    ));

    let pending = ctx
        .ingest(Sample::new("battery_soc", 10.0, Utc::now()), Utc::now())
        .await;

    server
        .post("/api/samples")
        .json(&json!({ "metricKey": "battery_soc", "value": 8.0 }))
        .await
        .assert_status(StatusCode::ACCEPTED);
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
    while ctx.cache.get_number("battery_soc").await != Some(8.0) {
        assert!(tokio::time::Instant::now() < deadline, "second sample not processed");
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }

    server
        .post("/api/charger/on")
        .expect_failure()
        .await
        .assert_status(StatusCode::CONFLICT);

    actuator.release.notify_one();
    pending.join().await;
    assert_eq!(actuator.events(), vec!["battery_low"]);
    assert!(ctx.control.state().await.is_on);
}
