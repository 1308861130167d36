// Battery-level alerting through the ingestion pipeline

mod common;

use chrono::{Duration, TimeZone, Utc};
use async_trait::async_trait;
use common::{RecordingActuator, harness, harness_with, test_config};
use powerhub::context::{AppContext, Collaborators};
use powerhub::models::{AlertKind, AlertState, Sample};
use powerhub::notifier::{DispatchError, Notifier};
use powerhub::state_store::{PersistedState, StateStore};
use std::sync::{Arc, Mutex};

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 2, 18, 0, 0).unwrap()
}

fn battery_kinds(history: &[powerhub::models::AlertRecord]) -> Vec<AlertKind> {
    history
        .iter()
        .rev()
        .filter(|a| matches!(a.kind, AlertKind::BatteryLow | AlertKind::BatteryRecovered))
        .map(|a| a.kind)
        .collect()
}

#[tokio::test]
async fn each_crossing_notifies_exactly_once() {
    let mut config = test_config();
    config.charger.enabled = false;
    let h = harness_with(config, RecordingActuator::default(), None, None, t0()).await;

    for (i, soc) in [60.0, 40.0, 35.0, 45.0, 85.0, 30.0].into_iter().enumerate() {
        h.ingest("battery_soc", soc, t0() + Duration::minutes(i as i64)).await;
    }

    assert_eq!(
        battery_kinds(&h.ctx.alerts.history().await),
        vec![
            AlertKind::BatteryLow,
            AlertKind::BatteryRecovered,
            AlertKind::BatteryLow
        ]
    );
    assert_eq!(
        h.notifier.subjects(),
        vec![
            "Battery low: 40%".to_string(),
            "Battery recovered: 85%".to_string(),
            "Battery low: 30%".to_string(),
        ]
    );
}

#[tokio::test]
async fn history_is_newest_first_and_bounded() {
    let mut config = test_config();
    config.charger.enabled = false;
    config.alerts.history_limit = 3;
    let h = harness_with(config, RecordingActuator::default(), None, None, t0()).await;

    for i in 0..5 {
        let at = t0() + Duration::minutes(2 * i);
        h.ingest("battery_soc", 10.0, at).await;
        h.ingest("battery_soc", 90.0, at + Duration::minutes(1)).await;
    }

    let history = h.ctx.alerts.history().await;
    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|w| w[0].time >= w[1].time));
    assert_eq!(history[0].kind, AlertKind::BatteryRecovered);
}

#[tokio::test]
async fn disabled_alerts_stay_silent() {
    let mut config = test_config();
    config.charger.enabled = false;
    config.alerts.enabled = false;
    let h = harness_with(config, RecordingActuator::default(), None, None, t0()).await;

    h.ingest("battery_soc", 10.0, t0()).await;
    h.ingest("battery_soc", 90.0, t0() + Duration::minutes(1)).await;

    assert!(h.ctx.alerts.history().await.is_empty());
    assert!(h.notifier.subjects().is_empty());
    assert_eq!(h.ctx.alerts.battery_state().await, AlertState::default());
}

#[tokio::test]
async fn restored_low_state_does_not_alert_again() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));
    store
        .save(&PersistedState {
            battery_alert: AlertState {
                below_threshold: true,
                last_alert_time: Some(t0() - Duration::hours(1)),
                last_alert_type: Some(AlertKind::BatteryLow),
            },
            ..Default::default()
        })
        .unwrap();

    let mut config = test_config();
    config.charger.enabled = false;
    let h = harness_with(config, RecordingActuator::default(), Some(store), None, t0()).await;
    h.ingest("battery_soc", 20.0, t0()).await;
    assert!(h.notifier.subjects().is_empty());

    h.ingest("battery_soc", 80.0, t0() + Duration::minutes(1)).await;
    assert_eq!(h.notifier.subjects(), vec!["Battery recovered: 80%".to_string()]);
}

#[tokio::test]
async fn non_numeric_soc_is_cached_but_ignored() {
    let h = harness(t0()).await;
    let tasks = h
        .ctx
        .ingest(
            powerhub::models::Sample::new("battery_soc", "unavailable", t0()),
            t0(),
        )
        .await;
    assert!(tasks.is_empty());
    assert!(h.ctx.cache.get("battery_soc").await.is_some());
    assert!(h.ctx.alerts.history().await.is_empty());
    assert_eq!(h.ctx.archive.len("battery_soc").await, 0);
}

/// Notifier that records whether the state file already held the low transition when called.
struct StateCheckingNotifier {
    store: StateStore,
    saw_below_threshold: Mutex<Vec<bool>>,
}

#[async_trait]
impl Notifier for StateCheckingNotifier {
    async fn notify(&self, _subject: &str, _body: &str) -> Result<(), DispatchError> {
        let saved = self.store.load_or_default();
        self.saw_below_threshold
            .lock()
            .unwrap()
            .push(saved.battery_alert.below_threshold);
        Err(DispatchError::Status(503))
    }
}

#[tokio::test]
async fn alert_state_is_persisted_after_the_notification_returns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let notifier = Arc::new(StateCheckingNotifier {
        store: StateStore::new(&path),
        saw_below_threshold: Mutex::new(Vec::new()),
    });
    let mut config = test_config();
    config.charger.enabled = false;
    let ctx = AppContext::build(
        config,
        Collaborators {
            actuator: Arc::new(RecordingActuator::default()),
            notifier: notifier.clone(),
            state_store: Some(StateStore::new(&path)),
            archive_db: None,
        },
        t0(),
    )
    .await;

    ctx.ingest(Sample::new("battery_soc", 40.0, t0()), t0())
        .await
        .join()
        .await;

    assert_eq!(*notifier.saw_below_threshold.lock().unwrap(), vec![false]);
    // A failed delivery still commits the transition.
    let saved = StateStore::new(&path).load().unwrap();
    assert!(saved.battery_alert.below_threshold);
}
