// Durable controller state: daily stats, charger state, alert state and history, as one JSON
// document replaced atomically (temp file + rename).

use crate::models::{AlertRecord, AlertState, ControlState, DailyStats};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub daily_stats: Option<DailyStats>,
    #[serde(default)]
    pub control: ControlState,
    #[serde(default)]
    pub battery_alert: AlertState,
    #[serde(default)]
    pub alert_history: Vec<AlertRecord>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads the state file. A missing file yields defaults; unreadable or malformed is an error.
    pub fn load(&self) -> Result<PersistedState> {
        if !self.path.exists() {
            info!(
                "state file not found at {}, using defaults",
                self.path.display()
            );
            return Ok(PersistedState::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state from {}", self.path.display()))?;
        let state: PersistedState = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse state from {}", self.path.display()))?;
        info!(
            charger_on = state.control.is_on,
            battery_below_threshold = state.battery_alert.below_threshold,
            alerts = state.alert_history.len(),
            "loaded state from {}",
            self.path.display()
        );
        Ok(state)
    }

    /// Like `load`, but any failure falls back to defaults.
    pub fn load_or_default(&self) -> PersistedState {
        self.load().unwrap_or_else(|e| {
            warn!(error = %e, operation = "load_state", "state file unusable, starting from defaults");
            PersistedState::default()
        })
    }

    pub fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &json)
            .with_context(|| format!("Failed to write temp file {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to rename temp file to {}", self.path.display()))?;
        Ok(())
    }
}
