use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    BatteryLow,
    BatteryRecovered,
    PeakDischarge,
    ChargerOn,
    ChargerOff,
    ChargerFailed,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::BatteryLow => write!(f, "low"),
            AlertKind::BatteryRecovered => write!(f, "recovered"),
            AlertKind::PeakDischarge => write!(f, "peak_discharge"),
            AlertKind::ChargerOn => write!(f, "charger_on"),
            AlertKind::ChargerOff => write!(f, "charger_off"),
            AlertKind::ChargerFailed => write!(f, "charger_failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub kind: AlertKind,
    /// Reading that raised the alert; absent for manual charger actions without a SOC.
    #[serde(default)]
    pub value: Option<f64>,
    pub time: DateTime<Utc>,
    pub message: String,
}

/// Edge-trigger state for the battery-level alert.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertState {
    pub below_threshold: bool,
    pub last_alert_time: Option<DateTime<Utc>>,
    pub last_alert_type: Option<AlertKind>,
}
