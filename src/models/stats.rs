use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakPower {
    pub value: f64,
    pub time: Option<DateTime<Utc>>,
}

/// Per-calendar-day statistics. Replaced wholesale when the local date changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub date: NaiveDate,
    /// Cumulative-energy counter value at the start of the day, per metric.
    #[serde(default)]
    pub baseline_values: BTreeMap<String, Option<f64>>,
    #[serde(default)]
    pub peak_power: PeakPower,
    /// Local hour (0..24) -> highest power seen in that hour.
    #[serde(default)]
    pub peak_power_hourly: BTreeMap<u32, f64>,
}

impl DailyStats {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            baseline_values: BTreeMap::new(),
            peak_power: PeakPower::default(),
            peak_power_hourly: BTreeMap::new(),
        }
    }

    pub fn baseline(&self, metric_key: &str) -> Option<f64> {
        self.baseline_values.get(metric_key).copied().flatten()
    }
}
