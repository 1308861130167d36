// Shared test helpers
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use powerhub::archive_repo::ArchiveDb;
use powerhub::config::AppConfig;
use powerhub::context::{AppContext, Collaborators};
use powerhub::models::Sample;
use powerhub::notifier::{Actuator, DispatchError, Notifier, TriggerContext};
use powerhub::state_store::StateStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const BASE_CONFIG: &str = r#"
[server]
port = 8081
host = "127.0.0.1"

[storage]
archive_db_path = "data/test-archive.db"
state_path = "data/test-state.json"
archive_interval_secs = 60

[alerts]
low_threshold = 50.0
high_threshold = 80.0

[charger]
enabled = true
webhook_key = "test-key"
low_threshold = 25.0
high_threshold = 95.0
max_temp = 45.0
cooldown_secs = 300
"#;

pub fn test_config() -> AppConfig {
    AppConfig::load_from_str(BASE_CONFIG).unwrap()
}

/// Actuator that records event ids; fails every call while `fail` is set.
#[derive(Default)]
pub struct RecordingActuator {
    pub events: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl RecordingActuator {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn trigger(&self, event_id: &str, _ctx: &TriggerContext) -> Result<(), DispatchError> {
        self.events.lock().unwrap().push(event_id.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::Status(500));
        }
        Ok(())
    }
}

/// Actuator that records each event, then holds the call open until `release` is notified.
#[derive(Default)]
pub struct GatedActuator {
    pub events: Mutex<Vec<String>>,
    pub release: Notify,
}

impl GatedActuator {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Actuator for GatedActuator {
    async fn trigger(&self, event_id: &str, _ctx: &TriggerContext) -> Result<(), DispatchError> {
        self.events.lock().unwrap().push(event_id.to_string());
        self.release.notified().await;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), DispatchError> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub ctx: Arc<AppContext>,
    pub actuator: Arc<RecordingActuator>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    /// Ingests one sample and waits for every outbound call it spawned.
    pub async fn ingest(&self, metric: &str, value: f64, at: DateTime<Utc>) {
        self.ctx
            .ingest(Sample::new(metric, value, at), at)
            .await
            .join()
            .await;
    }
}

pub async fn harness_with(
    config: AppConfig,
    actuator: RecordingActuator,
    state_store: Option<StateStore>,
    archive_db: Option<ArchiveDb>,
    now: DateTime<Utc>,
) -> Harness {
    let actuator = Arc::new(actuator);
    let notifier = Arc::new(RecordingNotifier::default());
    let ctx = AppContext::build(
        config,
        Collaborators {
            actuator: actuator.clone(),
            notifier: notifier.clone(),
            state_store,
            archive_db,
        },
        now,
    )
    .await;
    Harness {
        ctx,
        actuator,
        notifier,
    }
}

pub async fn harness(now: DateTime<Utc>) -> Harness {
    harness_with(test_config(), RecordingActuator::default(), None, None, now).await
}
