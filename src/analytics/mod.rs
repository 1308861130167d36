// Daily energy totals and peaks. Day rollover is an explicit reset driven by ingestion and the
// summary worker; reads never mutate the daily record.

pub mod integration;
mod summary;

pub use integration::{
    Runtime, array_percentage, estimated_runtime, peak_of, power_balance, trapezoid_kwh,
};
pub use summary::{PowerSummary, summarize};

use crate::archive_repo::ArchiveStore;
use crate::config::EnergyPair;
use crate::models::{DailyStats, PeakPower, Sample};
use crate::sample_cache::SampleCache;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Timelike, Utc};
use tokio::sync::Mutex;

/// Calendar date of `t` in local time.
pub fn local_date(t: DateTime<Utc>) -> NaiveDate {
    t.with_timezone(&Local).date_naive()
}

/// UTC instant of local midnight starting `date`.
pub fn local_day_start(date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

#[derive(Debug)]
pub struct EnergyAnalytics {
    pairs: Vec<EnergyPair>,
    peak_key: String,
    daily: Mutex<DailyStats>,
}

impl EnergyAnalytics {
    /// `restored` is kept only when it belongs to `today`.
    pub fn new(
        pairs: Vec<EnergyPair>,
        peak_key: impl Into<String>,
        restored: Option<DailyStats>,
        today: NaiveDate,
    ) -> Self {
        let daily = restored
            .filter(|s| s.date == today)
            .unwrap_or_else(|| DailyStats::new(today));
        Self {
            pairs,
            peak_key: peak_key.into(),
            daily: Mutex::new(daily),
        }
    }

    /// Resets the daily record when `today` differs from its date. Returns the finished day.
    pub async fn roll_over(&self, today: NaiveDate) -> Option<DailyStats> {
        let mut daily = self.daily.lock().await;
        if daily.date == today {
            return None;
        }
        let finished = std::mem::replace(&mut *daily, DailyStats::new(today));
        tracing::info!(previous = %finished.date, today = %today, "daily stats rolled over");
        Some(finished)
    }

    /// Folds one sample into the daily record: baseline capture for cumulative counters and
    /// peak tracking for the peak metric.
    pub async fn observe(&self, sample: &Sample, archive: &ArchiveStore, now: DateTime<Utc>) {
        let today = local_date(now);
        self.roll_over(today).await;
        let Some(value) = sample.value.as_number() else {
            return;
        };

        if let Some(pair) = self
            .pairs
            .iter()
            .find(|p| p.cumulative_key == sample.metric_key)
        {
            let has_baseline = self.daily.lock().await.baseline(&pair.cumulative_key).is_some();
            if !has_baseline {
                // Energy already produced today (e.g. before a restart) comes off the first
                // counter reading so the daily total stays continuous.
                let so_far = self.integrated_today(&pair.power_key, archive, today).await;
                let baseline = value - so_far;
                let mut daily = self.daily.lock().await;
                daily
                    .baseline_values
                    .entry(pair.cumulative_key.clone())
                    .or_insert(Some(baseline));
                tracing::debug!(metric_key = %pair.cumulative_key, baseline, "daily baseline captured");
            }
        }

        if sample.metric_key == self.peak_key {
            let mut daily = self.daily.lock().await;
            if daily.peak_power.time.is_none() || value > daily.peak_power.value {
                daily.peak_power = PeakPower {
                    value,
                    time: Some(sample.timestamp),
                };
            }
            let hour = sample.timestamp.with_timezone(&Local).hour();
            let slot = daily.peak_power_hourly.entry(hour).or_insert(value);
            if value > *slot {
                *slot = value;
            }
        }
    }

    /// kWh produced/consumed today for `metric_key` (a cumulative key or its power key).
    /// Uses counter minus baseline when both are known, otherwise integrates today's archived
    /// power series.
    pub async fn daily_energy(
        &self,
        metric_key: &str,
        cache: &SampleCache,
        archive: &ArchiveStore,
        now: DateTime<Utc>,
    ) -> f64 {
        let today = local_date(now);
        let pair = self
            .pairs
            .iter()
            .find(|p| p.cumulative_key == metric_key || p.power_key == metric_key);
        let Some(pair) = pair else {
            return self.integrated_today(metric_key, archive, today).await;
        };

        let baseline = {
            let daily = self.daily.lock().await;
            (daily.date == today)
                .then(|| daily.baseline(&pair.cumulative_key))
                .flatten()
        };
        let current = cache.get_number(&pair.cumulative_key).await;
        match (current, baseline) {
            (Some(current), Some(baseline)) => (current - baseline).max(0.0),
            _ => self.integrated_today(&pair.power_key, archive, today).await,
        }
    }

    /// Highest archived value since `since` (all time when None).
    pub async fn peak_power(
        &self,
        metric_key: &str,
        since: Option<DateTime<Utc>>,
        archive: &ArchiveStore,
    ) -> Option<PeakPower> {
        peak_of(&archive.series_since(metric_key, since).await)
    }

    pub async fn stats(&self) -> DailyStats {
        self.daily.lock().await.clone()
    }

    pub fn pairs(&self) -> &[EnergyPair] {
        &self.pairs
    }

    async fn integrated_today(
        &self,
        power_key: &str,
        archive: &ArchiveStore,
        today: NaiveDate,
    ) -> f64 {
        let from = local_day_start(today);
        let to = local_day_start(today + chrono::Days::new(1)) - chrono::Duration::milliseconds(1);
        let points = archive.query(power_key, from, to).await;
        trapezoid_kwh(&points)
    }
}
