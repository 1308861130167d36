use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlAction {
    On,
    Off,
}

impl ControlAction {
    /// Event identifier sent to the actuator webhook.
    pub fn event_id(self) -> &'static str {
        match self {
            ControlAction::On => "battery_low",
            ControlAction::Off => "battery_charged",
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlAction::On => write!(f, "ON"),
            ControlAction::Off => write!(f, "OFF"),
        }
    }
}

/// Charger automation state; persisted so a restart never re-fires an action already taken.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlState {
    pub is_on: bool,
    pub last_action: Option<ControlAction>,
    pub last_action_time: Option<DateTime<Utc>>,
    #[serde(rename = "lastSOC")]
    pub last_soc: Option<f64>,
}
