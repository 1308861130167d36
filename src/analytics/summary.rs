// Live power picture assembled from the cache: balance, runtime and array utilisation.

use super::integration::{Runtime, array_percentage, estimated_runtime, power_balance};
use crate::config::{BatteryConfig, MetricsConfig};
use crate::models::Sample;
use crate::sample_cache::number_of;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerSummary {
    pub solar_w: Option<f64>,
    pub load_w: Option<f64>,
    pub battery_power_w: Option<f64>,
    pub soc: Option<f64>,
    pub power_balance_w: f64,
    pub runtime: Runtime,
    /// Human-readable runtime ("3.5 hours", "indefinite", ...); "N/A" without a SOC reading.
    pub runtime_text: String,
    pub array_percentage: f64,
    pub charger_on: bool,
}

pub fn summarize(
    snapshot: &HashMap<String, Sample>,
    metrics: &MetricsConfig,
    battery: &BatteryConfig,
    charger_on: bool,
) -> PowerSummary {
    let solar_w = number_of(snapshot, &metrics.solar_power_key);
    let load_w = number_of(snapshot, &metrics.load_power_key);
    let battery_power_w = number_of(snapshot, &metrics.battery_power_key);
    let soc = number_of(snapshot, &metrics.soc_key);

    let balance = power_balance(
        solar_w.unwrap_or(0.0),
        load_w.unwrap_or(0.0),
        charger_on,
        battery_power_w.unwrap_or(0.0),
    );
    let runtime = estimated_runtime(
        soc.unwrap_or(0.0),
        balance,
        battery.capacity_ah,
        battery.voltage,
    );
    let runtime_text = if soc.is_some() {
        runtime.to_string()
    } else {
        "N/A".to_string()
    };

    PowerSummary {
        solar_w,
        load_w,
        battery_power_w,
        soc,
        power_balance_w: balance,
        runtime,
        runtime_text,
        array_percentage: array_percentage(solar_w.unwrap_or(0.0), battery.array_capacity_w),
        charger_on,
    }
}
