// Process-wide context: owns every component, built once from disk (or defaults), and passed
// explicitly to workers and routes.

use crate::alert_engine::{AlertEngine, subject_for};
use crate::analytics::{EnergyAnalytics, PowerSummary, local_date, summarize};
use crate::archive_repo::{ArchiveDb, ArchiveSettings, ArchiveStore};
use crate::config::AppConfig;
use crate::control_loop::{
    ChargerSettings, ControlLoop, ControlOutcome, PendingAction, Veto, fresh_temperature,
};
use crate::models::{AlertKind, AlertRecord, ControlAction, Sample};
use crate::notifier::{Actuator, DispatchError, Notifier, with_timeout};
use crate::peak_discharge::PeakDischargeMonitor;
use crate::sample_cache::SampleCache;
use crate::state_store::{PersistedState, StateStore};
use chrono::{DateTime, Local, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// External collaborators and storage handles the context is built with.
pub struct Collaborators {
    pub actuator: Arc<dyn Actuator>,
    pub notifier: Arc<dyn Notifier>,
    pub state_store: Option<StateStore>,
    pub archive_db: Option<ArchiveDb>,
}

/// Outbound calls spawned while processing a sample. Dropping this detaches them.
#[derive(Default)]
pub struct OutboundTasks(Vec<JoinHandle<()>>);

impl OutboundTasks {
    fn push(&mut self, handle: JoinHandle<()>) {
        self.0.push(handle);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Waits for every spawned call to finish.
    pub async fn join(self) {
        futures_util::future::join_all(self.0).await;
    }
}

pub struct AppContext {
    pub config: AppConfig,
    pub cache: SampleCache,
    pub archive: ArchiveStore,
    pub analytics: EnergyAnalytics,
    pub alerts: AlertEngine,
    pub control: ControlLoop,
    pub peak_discharge: PeakDischargeMonitor,
    notifier: Arc<dyn Notifier>,
    notify_timeout: Duration,
    state_store: Option<StateStore>,
    archive_db: Option<ArchiveDb>,
    save_lock: tokio::sync::Mutex<()>,
    samples_ingested_total: AtomicU64,
    persists_total: AtomicU64,
}

impl AppContext {
    /// Builds the context, restoring archive and controller state when storage is available.
    pub async fn build(
        config: AppConfig,
        collaborators: Collaborators,
        now: DateTime<Utc>,
    ) -> Arc<Self> {
        let Collaborators {
            actuator,
            notifier,
            state_store,
            archive_db,
        } = collaborators;

        let persisted = state_store
            .as_ref()
            .map(StateStore::load_or_default)
            .unwrap_or_default();

        let archive = ArchiveStore::new(ArchiveSettings::from_config(
            &config.metrics.tracked,
            &config.storage,
        ));
        if let Some(db) = archive_db.as_ref() {
            archive.load_from(db).await;
        }

        let analytics = EnergyAnalytics::new(
            config.metrics.energy.clone(),
            config.metrics.solar_power_key.clone(),
            persisted.daily_stats,
            local_date(now),
        );
        let alerts = AlertEngine::new(
            &config.alerts,
            Some(persisted.battery_alert),
            persisted.alert_history,
        );
        let control = ControlLoop::new(
            ChargerSettings::from_config(&config.charger),
            actuator,
            persisted.control,
        );
        let peak_discharge = PeakDischargeMonitor::new(&config.peak_discharge);

        if !control.settings().armed {
            tracing::info!("charger automation disabled (charger.enabled = false or no webhook key)");
        }

        Arc::new(Self {
            notify_timeout: Duration::from_secs(config.notifications.timeout_secs),
            config,
            cache: SampleCache::new(),
            archive,
            analytics,
            alerts,
            control,
            peak_discharge,
            notifier,
            state_store,
            archive_db,
            save_lock: tokio::sync::Mutex::new(()),
            samples_ingested_total: AtomicU64::new(0),
            persists_total: AtomicU64::new(0),
        })
    }

    /// Runs one sample through cache, archive, analytics, alerting, charger control and peak
    /// discharge detection. Outbound calls are spawned, not awaited.
    pub async fn ingest(self: &Arc<Self>, sample: Sample, now: DateTime<Utc>) -> OutboundTasks {
        self.samples_ingested_total.fetch_add(1, Ordering::Relaxed);
        let mut tasks = OutboundTasks::default();

        self.cache.put(sample.clone()).await;
        self.archive
            .record(&sample.metric_key, &sample.value, sample.timestamp, now)
            .await;
        self.analytics.observe(&sample, &self.archive, now).await;

        let Some(value) = sample.value.as_number() else {
            return tasks;
        };
        let metrics = &self.config.metrics;

        if sample.metric_key == metrics.soc_key {
            if let Some(record) = self.alerts.check_battery(value, now).await {
                let ctx = Arc::clone(self);
                tasks.push(tokio::spawn(async move {
                    ctx.report_battery_alert(record).await;
                }));
            }

            let reading = self.cache.get(&metrics.temperature_key).await;
            let temperature = fresh_temperature(self.control.settings(), reading.as_ref(), now);
            match self.control.begin(value, temperature, now).await {
                Ok(pending) => {
                    let ctx = Arc::clone(self);
                    tasks.push(tokio::spawn(async move {
                        ctx.execute_charger(pending).await;
                    }));
                }
                Err(veto @ (Veto::OverTemperature | Veto::NoTemperature)) => {
                    tracing::debug!(soc = value, ?temperature, ?veto, "charger interlock engaged");
                }
                Err(veto) => tracing::trace!(?veto, soc = value, "charger unchanged"),
            }
        }

        if sample.metric_key == metrics.battery_power_key
            && let Some(record) = self.peak_discharge.check(value, now).await
        {
            self.alerts.record(record.clone()).await;
            tasks.push(self.spawn_notify(subject_for(&record), record.message));
        }

        tasks
    }

    /// Sends the low/recovered notification, then persists the alert transition.
    async fn report_battery_alert(&self, record: AlertRecord) {
        if let Err(e) = self.notify(&subject_for(&record), &record.message).await {
            tracing::warn!(error = %e, kind = %record.kind, "battery alert notification failed");
        }
        if let Err(e) = self.save_state().await {
            tracing::warn!(error = %e, operation = "save_state", "failed to persist alert state");
        }
    }

    /// Fires a pending charger action, then records, persists and reports the outcome.
    pub async fn execute_charger(&self, pending: PendingAction) -> ControlOutcome {
        let outcome = self.control.execute(pending).await;
        let (record, persist) = match &outcome {
            ControlOutcome::Switched { pending, .. } => {
                let kind = match pending.action {
                    ControlAction::On => AlertKind::ChargerOn,
                    ControlAction::Off => AlertKind::ChargerOff,
                };
                let message = format!(
                    "{} (SOC {}). Event '{}' sent.",
                    pending.label(),
                    soc_text(pending.soc),
                    pending.action.event_id()
                );
                (alert(kind, pending.soc, pending.requested_at, message), true)
            }
            ControlOutcome::Failed { pending, error } => {
                let message = format!(
                    "Could not switch charger {} at SOC {}: {}. State left unchanged.",
                    pending.action,
                    soc_text(pending.soc),
                    error
                );
                (
                    alert(AlertKind::ChargerFailed, pending.soc, pending.requested_at, message),
                    false,
                )
            }
        };

        self.alerts.record(record.clone()).await;
        if persist && let Err(e) = self.save_state().await {
            tracing::warn!(error = %e, operation = "save_state", "failed to persist charger state");
        }
        if let Err(e) = self.notify(&subject_for(&record), &record.message).await {
            tracing::warn!(error = %e, "charger notification failed");
        }
        outcome
    }

    /// Manual charger switch; bypasses every guard except arming.
    pub async fn manual_charger(
        &self,
        action: ControlAction,
        now: DateTime<Utc>,
    ) -> Result<ControlOutcome, Veto> {
        let soc = self.cache.get_number(&self.config.metrics.soc_key).await;
        let pending = self.control.begin_manual(action, soc, now).await?;
        Ok(self.execute_charger(pending).await)
    }

    /// Sends a notification, bounded by the notification timeout.
    pub async fn notify(&self, subject: &str, body: &str) -> Result<(), DispatchError> {
        with_timeout(self.notify_timeout, self.notifier.notify(subject, body)).await
    }

    fn spawn_notify(&self, subject: String, body: String) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        let limit = self.notify_timeout;
        tokio::spawn(async move {
            if let Err(e) = with_timeout(limit, notifier.notify(&subject, &body)).await {
                tracing::warn!(error = %e, subject = %subject, "notification failed");
            }
        })
    }

    pub async fn persisted_state(&self) -> PersistedState {
        PersistedState {
            daily_stats: Some(self.analytics.stats().await),
            control: self.control.state().await,
            battery_alert: self.alerts.battery_state().await,
            alert_history: self.alerts.history().await,
        }
    }

    /// Writes the controller state file. No-op without a state store.
    pub async fn save_state(&self) -> anyhow::Result<()> {
        let Some(store) = self.state_store.clone() else {
            return Ok(());
        };
        let _guard = self.save_lock.lock().await;
        let state = self.persisted_state().await;
        tokio::task::spawn_blocking(move || store.save(&state)).await??;
        Ok(())
    }

    /// Prunes expired archive points. Returns the number removed.
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        self.archive
            .prune(self.config.storage.retention_days, now)
            .await
    }

    /// Best-effort write of archive and controller state; failures are logged, never raised.
    pub async fn persist_all(&self, now: DateTime<Utc>) {
        if let Some(db) = self.archive_db.as_ref()
            && let Err(e) = self.archive.persist_to(db, now).await
        {
            tracing::warn!(error = %e, operation = "persist_archive", "archive persist failed");
        }
        if let Err(e) = self.save_state().await {
            tracing::warn!(error = %e, operation = "save_state", "state persist failed");
        }
        self.persists_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Today's energy per configured cumulative metric, in kWh.
    pub async fn daily_energy_report(&self, now: DateTime<Utc>) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for pair in self.analytics.pairs() {
            let kwh = self
                .analytics
                .daily_energy(&pair.cumulative_key, &self.cache, &self.archive, now)
                .await;
            out.insert(pair.cumulative_key.clone(), kwh);
        }
        out
    }

    pub async fn summary(&self) -> PowerSummary {
        let snapshot = self.cache.snapshot().await;
        let charger_on = self.control.state().await.is_on;
        summarize(
            &snapshot,
            &self.config.metrics,
            &self.config.battery,
            charger_on,
        )
    }

    /// Subject and body of the end-of-day report.
    pub async fn compose_daily_summary(&self, now: DateTime<Utc>) -> (String, String) {
        let stats = self.analytics.stats().await;
        let energy = self.daily_energy_report(now).await;
        let summary = self.summary().await;
        let today = local_date(now);
        let alerts_today = self
            .alerts
            .history()
            .await
            .iter()
            .filter(|a| local_date(a.time) == today)
            .count();

        let mut body = format!("Daily summary for {}\n\n", stats.date);
        for (metric, kwh) in &energy {
            body.push_str(&format!("{}: {:.2} kWh\n", metric, kwh));
        }
        match stats.peak_power.time {
            Some(t) => body.push_str(&format!(
                "Peak power: {:.0} W at {}\n",
                stats.peak_power.value,
                t.with_timezone(&Local).format("%H:%M")
            )),
            None => body.push_str("Peak power: N/A\n"),
        }
        match summary.soc {
            Some(soc) => body.push_str(&format!("Battery SOC: {:.1}%\n", soc)),
            None => body.push_str("Battery SOC: N/A\n"),
        }
        body.push_str(&format!(
            "Power balance: {:.0} W (runtime {})\n",
            summary.power_balance_w, summary.runtime_text
        ));
        body.push_str(&format!(
            "Charger: {}\n",
            if summary.charger_on { "ON" } else { "OFF" }
        ));
        body.push_str(&format!("Alerts today: {}\n", alerts_today));

        (format!("Power summary {}", stats.date), body)
    }

    pub fn samples_ingested_total(&self) -> u64 {
        self.samples_ingested_total.load(Ordering::Relaxed)
    }

    pub fn persists_total(&self) -> u64 {
        self.persists_total.load(Ordering::Relaxed)
    }
}

fn soc_text(soc: Option<f64>) -> String {
    soc.map_or_else(|| "unknown".to_string(), |soc| format!("{:.1}%", soc))
}

fn alert(kind: AlertKind, value: Option<f64>, time: DateTime<Utc>, message: String) -> AlertRecord {
    AlertRecord {
        kind,
        value,
        time,
        message,
    }
}
