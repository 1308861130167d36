// Charger automation: hysteresis on SOC with an over-temperature interlock and a cooldown
// between switches. State changes only after the actuator confirms; failures leave it as is.

use crate::config::ChargerConfig;
use crate::models::{ControlAction, ControlState, Sample};
use crate::notifier::{Actuator, DispatchError, TriggerContext, with_timeout};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ChargerSettings {
    /// Feature flag on and credential present.
    pub armed: bool,
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub max_temp: f64,
    /// Temperature readings older than this are ignored.
    pub temp_max_age: chrono::Duration,
    pub block_without_temp: bool,
    pub cooldown: chrono::Duration,
    pub request_timeout: Duration,
}

impl ChargerSettings {
    pub fn from_config(config: &ChargerConfig) -> Self {
        Self {
            armed: config.is_armed(),
            low_threshold: config.low_threshold,
            high_threshold: config.high_threshold,
            max_temp: config.max_temp,
            temp_max_age: chrono::Duration::seconds(config.temp_max_age_secs as i64),
            block_without_temp: config.block_without_temp,
            cooldown: chrono::Duration::seconds(config.cooldown_secs as i64),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// Why an evaluation did not produce an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Veto {
    Disarmed,
    OverTemperature,
    /// No fresh temperature reading and `block_without_temp` is set.
    NoTemperature,
    Cooldown,
    /// A trigger for this loop is still awaiting its response.
    InFlight,
    NoTransition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub action: ControlAction,
    /// None for a manual action taken before any SOC reading arrived.
    pub soc: Option<f64>,
    pub requested_at: DateTime<Utc>,
    pub manual: bool,
}

impl PendingAction {
    pub fn label(&self) -> &'static str {
        match (self.action, self.manual) {
            (ControlAction::On, false) => "Battery low - charger ON",
            (ControlAction::Off, false) => "Battery charged - charger OFF",
            (ControlAction::On, true) => "Manual charger ON",
            (ControlAction::Off, true) => "Manual charger OFF",
        }
    }
}

#[derive(Debug)]
pub enum ControlOutcome {
    Switched {
        pending: PendingAction,
        state: ControlState,
    },
    Failed {
        pending: PendingAction,
        error: DispatchError,
    },
}

/// The cached temperature when it is numeric and no older than `temp_max_age`.
pub fn fresh_temperature(
    settings: &ChargerSettings,
    reading: Option<&Sample>,
    now: DateTime<Utc>,
) -> Option<f64> {
    let sample = reading?;
    if now - sample.timestamp > settings.temp_max_age {
        return None;
    }
    sample.value.as_number()
}

/// Guard evaluation in order: arming, temperature interlock, cooldown, hysteresis.
/// A missing temperature reading engages the interlock only with `block_without_temp`.
pub fn decide(
    settings: &ChargerSettings,
    state: &ControlState,
    soc: f64,
    temperature: Option<f64>,
    now: DateTime<Utc>,
) -> Result<ControlAction, Veto> {
    if !settings.armed {
        return Err(Veto::Disarmed);
    }
    match temperature {
        Some(t) if t > settings.max_temp => return Err(Veto::OverTemperature),
        None if settings.block_without_temp => return Err(Veto::NoTemperature),
        _ => {}
    }
    if let Some(last) = state.last_action_time
        && now - last < settings.cooldown
    {
        return Err(Veto::Cooldown);
    }
    match state.is_on {
        false if soc <= settings.low_threshold => Ok(ControlAction::On),
        true if soc >= settings.high_threshold => Ok(ControlAction::Off),
        _ => Err(Veto::NoTransition),
    }
}

#[derive(Debug)]
struct ControlInner {
    state: ControlState,
    in_flight: bool,
}

pub struct ControlLoop {
    settings: ChargerSettings,
    actuator: Arc<dyn Actuator>,
    inner: Mutex<ControlInner>,
}

impl ControlLoop {
    pub fn new(settings: ChargerSettings, actuator: Arc<dyn Actuator>, state: ControlState) -> Self {
        Self {
            settings,
            actuator,
            inner: Mutex::new(ControlInner {
                state,
                in_flight: false,
            }),
        }
    }

    pub fn settings(&self) -> &ChargerSettings {
        &self.settings
    }

    pub async fn state(&self) -> ControlState {
        self.inner.lock().await.state.clone()
    }

    /// Evaluates the guards for a SOC reading and, when an action is due, reserves the loop
    /// until `execute` completes.
    pub async fn begin(
        &self,
        soc: f64,
        temperature: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<PendingAction, Veto> {
        if !self.settings.armed {
            return Err(Veto::Disarmed);
        }
        let mut inner = self.inner.lock().await;
        if inner.in_flight {
            return Err(Veto::InFlight);
        }
        let action = decide(&self.settings, &inner.state, soc, temperature, now)?;
        inner.in_flight = true;
        Ok(PendingAction {
            action,
            soc: Some(soc),
            requested_at: now,
            manual: false,
        })
    }

    /// Manual override: only the arming check applies.
    pub async fn begin_manual(
        &self,
        action: ControlAction,
        soc: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<PendingAction, Veto> {
        if !self.settings.armed {
            return Err(Veto::Disarmed);
        }
        let mut inner = self.inner.lock().await;
        if inner.in_flight {
            return Err(Veto::InFlight);
        }
        inner.in_flight = true;
        Ok(PendingAction {
            action,
            soc,
            requested_at: now,
            manual: true,
        })
    }

    /// Fires the actuator and commits the new state only on success.
    pub async fn execute(&self, pending: PendingAction) -> ControlOutcome {
        let ctx = TriggerContext {
            soc: pending.soc,
            label: pending.label().to_string(),
            timestamp: pending.requested_at,
        };
        let result = with_timeout(
            self.settings.request_timeout,
            self.actuator.trigger(pending.action.event_id(), &ctx),
        )
        .await;

        let mut inner = self.inner.lock().await;
        inner.in_flight = false;
        match result {
            Ok(()) => {
                inner.state = ControlState {
                    is_on: pending.action == ControlAction::On,
                    last_action: Some(pending.action),
                    last_action_time: Some(pending.requested_at),
                    last_soc: pending.soc,
                };
                tracing::info!(action = %pending.action, soc = ?pending.soc, manual = pending.manual, "charger switched");
                ControlOutcome::Switched {
                    state: inner.state.clone(),
                    pending,
                }
            }
            Err(error) => {
                tracing::warn!(action = %pending.action, error = %error, "charger trigger failed");
                ControlOutcome::Failed { pending, error }
            }
        }
    }
}
