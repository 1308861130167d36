// Flags sustained battery discharge during the midday solar window, once per episode.

use crate::config::PeakDischargeConfig;
use crate::models::{AlertKind, AlertRecord};
use chrono::{DateTime, Datelike, Local, NaiveDateTime, Timelike, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

/// Midday window centred on solar noon; wider in the summer months.
#[derive(Debug, Clone)]
pub struct PeakWindow {
    pub solar_noon_hour: f64,
    pub summer_start_month: u32,
    pub summer_end_month: u32,
    pub summer_window_hours: f64,
    pub winter_window_hours: f64,
}

impl PeakWindow {
    pub fn from_config(config: &PeakDischargeConfig) -> Self {
        Self {
            solar_noon_hour: config.solar_noon_hour,
            summer_start_month: config.summer_start_month,
            summer_end_month: config.summer_end_month,
            summer_window_hours: config.summer_window_hours,
            winter_window_hours: config.winter_window_hours,
        }
    }

    fn is_summer(&self, month: u32) -> bool {
        if self.summer_start_month <= self.summer_end_month {
            (self.summer_start_month..=self.summer_end_month).contains(&month)
        } else {
            // Southern-hemisphere style range wrapping over new year, e.g. 10..=3.
            month >= self.summer_start_month || month <= self.summer_end_month
        }
    }

    pub fn width_hours(&self, month: u32) -> f64 {
        if self.is_summer(month) {
            self.summer_window_hours
        } else {
            self.winter_window_hours
        }
    }

    /// Whether a local wall-clock time falls in `[noon - w/2, noon + w/2)`.
    pub fn contains(&self, local: NaiveDateTime) -> bool {
        let hour = local.hour() as f64 + local.minute() as f64 / 60.0 + local.second() as f64 / 3600.0;
        let half = self.width_hours(local.month()) / 2.0;
        hour >= self.solar_noon_hour - half && hour < self.solar_noon_hour + half
    }

    pub fn is_within_peak_window(&self, now: DateTime<Utc>) -> bool {
        self.contains(now.with_timezone(&Local).naive_local())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakDischargeState {
    pub is_discharging: bool,
    pub discharge_start_time: Option<DateTime<Utc>>,
    pub alert_sent: bool,
}

#[derive(Debug, Clone)]
pub struct PeakDischargeDetector {
    window: PeakWindow,
    threshold_w: f64,
    min_duration: chrono::Duration,
    state: PeakDischargeState,
}

impl PeakDischargeDetector {
    pub fn new(window: PeakWindow, threshold_w: f64, min_duration: chrono::Duration) -> Self {
        Self {
            window,
            threshold_w,
            min_duration,
            state: PeakDischargeState::default(),
        }
    }

    /// Feeds one battery-power reading. Returns the episode length when the alert is due.
    pub fn check(&mut self, power_w: f64, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let discharging = power_w < self.threshold_w && self.window.is_within_peak_window(now);
        if !discharging {
            if self.state.is_discharging {
                tracing::debug!("peak discharge episode ended");
            }
            self.state = PeakDischargeState::default();
            return None;
        }
        let Some(start) = self.state.discharge_start_time else {
            self.state = PeakDischargeState {
                is_discharging: true,
                discharge_start_time: Some(now),
                alert_sent: false,
            };
            return None;
        };
        let elapsed = now - start;
        if elapsed >= self.min_duration && !self.state.alert_sent {
            self.state.alert_sent = true;
            return Some(elapsed);
        }
        None
    }

    pub fn state(&self) -> &PeakDischargeState {
        &self.state
    }
}

#[derive(Debug)]
pub struct PeakDischargeMonitor {
    enabled: bool,
    detector: Mutex<PeakDischargeDetector>,
}

impl PeakDischargeMonitor {
    pub fn new(config: &PeakDischargeConfig) -> Self {
        Self {
            enabled: config.enabled,
            detector: Mutex::new(PeakDischargeDetector::new(
                PeakWindow::from_config(config),
                config.discharge_threshold_w,
                chrono::Duration::minutes(config.min_duration_mins as i64),
            )),
        }
    }

    pub async fn check(&self, power_w: f64, now: DateTime<Utc>) -> Option<AlertRecord> {
        if !self.enabled {
            return None;
        }
        let elapsed = self.detector.lock().await.check(power_w, now)?;
        let minutes = elapsed.num_minutes();
        tracing::info!(power_w, minutes, "peak discharge alert");
        Some(AlertRecord {
            kind: AlertKind::PeakDischarge,
            value: Some(power_w),
            time: now,
            message: format!(
                "Battery has been discharging for {} minutes during peak solar hours (currently {:.0} W)",
                minutes, power_w
            ),
        })
    }

    pub async fn state(&self) -> PeakDischargeState {
        self.detector.lock().await.state().clone()
    }
}
