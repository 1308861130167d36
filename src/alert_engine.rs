// Edge-triggered battery-level alerting with a bounded, newest-first history.
//
// Normal -> BelowThreshold when SOC drops under `low`; back to Normal only once SOC reaches
// `high`. Samples that cross nothing are no-ops, so a "low" is never repeated without a
// "recovered" in between.

use crate::config::AlertsConfig;
use crate::models::{AlertKind, AlertRecord, AlertState};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// Pure hysteresis state machine for one alert type.
#[derive(Debug, Clone)]
pub struct BatteryAlert {
    low: f64,
    high: f64,
    state: AlertState,
}

impl BatteryAlert {
    pub fn new(low: f64, high: f64, state: AlertState) -> Self {
        Self { low, high, state }
    }

    /// Applies one SOC reading; returns the transition it caused, if any.
    pub fn check(&mut self, soc: f64, now: DateTime<Utc>) -> Option<AlertKind> {
        let kind = match self.state.below_threshold {
            false if soc < self.low => AlertKind::BatteryLow,
            true if soc >= self.high => AlertKind::BatteryRecovered,
            _ => return None,
        };
        self.state.below_threshold = kind == AlertKind::BatteryLow;
        self.state.last_alert_time = Some(now);
        self.state.last_alert_type = Some(kind);
        Some(kind)
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }
}

#[derive(Debug)]
struct AlertInner {
    battery: BatteryAlert,
    history: VecDeque<AlertRecord>,
}

#[derive(Debug)]
pub struct AlertEngine {
    enabled: bool,
    low: f64,
    high: f64,
    history_limit: usize,
    inner: Mutex<AlertInner>,
}

impl AlertEngine {
    pub fn new(
        config: &AlertsConfig,
        restored_state: Option<AlertState>,
        restored_history: Vec<AlertRecord>,
    ) -> Self {
        let mut history: VecDeque<AlertRecord> = restored_history.into();
        history.truncate(config.history_limit);
        Self {
            enabled: config.enabled,
            low: config.low_threshold,
            high: config.high_threshold,
            history_limit: config.history_limit,
            inner: Mutex::new(AlertInner {
                battery: BatteryAlert::new(
                    config.low_threshold,
                    config.high_threshold,
                    restored_state.unwrap_or_default(),
                ),
                history,
            }),
        }
    }

    /// Runs the battery-level state machine. When the master switch is off nothing changes and
    /// nothing is returned.
    pub async fn check_battery(&self, soc: f64, now: DateTime<Utc>) -> Option<AlertRecord> {
        if !self.enabled {
            return None;
        }
        let mut inner = self.inner.lock().await;
        let kind = inner.battery.check(soc, now)?;
        let message = match kind {
            AlertKind::BatteryLow => format!(
                "Battery level dropped to {:.1}% (below {:.0}%)",
                soc, self.low
            ),
            _ => format!(
                "Battery level recovered to {:.1}% (at or above {:.0}%)",
                soc, self.high
            ),
        };
        let record = AlertRecord {
            kind,
            value: Some(soc),
            time: now,
            message,
        };
        push_bounded(&mut inner.history, record.clone(), self.history_limit);
        tracing::info!(kind = %kind, soc, "battery alert transition");
        Some(record)
    }

    /// Appends an event raised elsewhere (peak discharge, charger actions) to the history.
    pub async fn record(&self, record: AlertRecord) {
        let mut inner = self.inner.lock().await;
        push_bounded(&mut inner.history, record, self.history_limit);
    }

    /// Newest first.
    pub async fn history(&self) -> Vec<AlertRecord> {
        self.inner.lock().await.history.iter().cloned().collect()
    }

    pub async fn battery_state(&self) -> AlertState {
        self.inner.lock().await.battery.state().clone()
    }

}

fn push_bounded(history: &mut VecDeque<AlertRecord>, record: AlertRecord, limit: usize) {
    history.push_front(record);
    history.truncate(limit);
}

/// Notification subject for an alert record.
pub fn subject_for(record: &AlertRecord) -> String {
    match record.kind {
        AlertKind::BatteryLow => format!("Battery low: {:.0}%", record.value.unwrap_or_default()),
        AlertKind::BatteryRecovered => {
            format!("Battery recovered: {:.0}%", record.value.unwrap_or_default())
        }
        AlertKind::PeakDischarge => "Battery discharging during peak solar hours".to_string(),
        AlertKind::ChargerOn => "Charger switched ON".to_string(),
        AlertKind::ChargerOff => "Charger switched OFF".to_string(),
        AlertKind::ChargerFailed => "Charger control failed".to_string(),
    }
}
