// Pure energy math: trapezoidal integration, peaks, power balance, runtime estimates.

use crate::models::{ArchivePoint, PeakPower};
use serde::Serialize;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Energy in kWh under a power series in watts, summing trapezoids between consecutive points.
/// Fewer than two points integrate to zero.
pub fn trapezoid_kwh(points: &[ArchivePoint]) -> f64 {
    points
        .windows(2)
        .map(|w| {
            let (a, b) = (w[0], w[1]);
            let hours = (b.timestamp_ms - a.timestamp_ms) as f64 / MS_PER_HOUR;
            ((a.value + b.value) / 2.0) * hours / 1000.0
        })
        .filter(|e| e.is_finite())
        .sum()
}

/// Highest value in the series and when it occurred; the first occurrence wins ties.
pub fn peak_of(points: &[ArchivePoint]) -> Option<PeakPower> {
    points
        .iter()
        .fold(None::<ArchivePoint>, |best, p| match best {
            Some(b) if b.value >= p.value => Some(b),
            _ => Some(*p),
        })
        .map(|p| PeakPower {
            value: p.value,
            time: Some(p.time()),
        })
}

/// Net power into the battery system. The charger's contribution counts only while it is on
/// and the battery is actually taking charge. Positive = net charging.
pub fn power_balance(solar_w: f64, load_w: f64, charger_on: bool, battery_power_w: f64) -> f64 {
    let charger_w = if charger_on && battery_power_w > 0.0 {
        battery_power_w
    } else {
        0.0
    };
    (solar_w + charger_w) - load_w
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "hours")]
pub enum Runtime {
    /// Net charging: the battery is not being drawn down.
    Indefinite,
    /// Exactly balanced.
    Infinite,
    Hours(f64),
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Runtime::Indefinite => write!(f, "indefinite"),
            Runtime::Infinite => write!(f, "infinite"),
            Runtime::Hours(h) if *h < 1.0 => write!(f, "{} minutes", (h * 60.0).round() as i64),
            Runtime::Hours(h) if *h < 24.0 => write!(f, "{:.1} hours", h),
            Runtime::Hours(h) => write!(f, "{:.1} days", h / 24.0),
        }
    }
}

pub fn estimated_runtime(soc: f64, balance_w: f64, capacity_ah: f64, voltage: f64) -> Runtime {
    if balance_w > 0.0 {
        return Runtime::Indefinite;
    }
    if balance_w == 0.0 {
        return Runtime::Infinite;
    }
    let available_wh = (capacity_ah * voltage * soc / 100.0).max(0.0);
    let hours = available_wh / balance_w.abs();
    Runtime::Hours(if hours.is_finite() { hours } else { 0.0 })
}

/// Solar output as a percentage of the array rating; 0 when the rating is unknown.
pub fn array_percentage(solar_w: f64, array_capacity_w: f64) -> f64 {
    if array_capacity_w <= 0.0 || !solar_w.is_finite() {
        return 0.0;
    }
    solar_w / array_capacity_w * 100.0
}
