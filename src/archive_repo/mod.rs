// Throttled, length-capped, retention-pruned time series per tracked metric.
// The in-memory store is authoritative; ArchiveDb snapshots it on the persist timer.

mod blob;
pub mod db;

pub use db::ArchiveDb;

use crate::config::StorageConfig;
use crate::models::{ArchivePoint, SampleValue, to_millis};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::instrument;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub tracked: Vec<String>,
    pub archive_interval: chrono::Duration,
    pub max_points: usize,
    pub max_future_skew: chrono::Duration,
}

impl ArchiveSettings {
    pub fn from_config(tracked: &[String], storage: &StorageConfig) -> Self {
        Self {
            tracked: tracked.to_vec(),
            archive_interval: chrono::Duration::seconds(storage.archive_interval_secs as i64),
            max_points: storage.max_points_per_series,
            max_future_skew: chrono::Duration::seconds(storage.max_future_skew_secs as i64),
        }
    }
}

#[derive(Debug, Default)]
struct ArchiveInner {
    series: HashMap<String, VecDeque<ArchivePoint>>,
    /// Wall-clock time of the last append per metric; throttles independent of sample timestamps.
    last_archived: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ArchiveStore {
    tracked: HashSet<String>,
    archive_interval: chrono::Duration,
    max_points: usize,
    max_future_skew: chrono::Duration,
    inner: RwLock<ArchiveInner>,
    points_archived_total: AtomicU64,
}

impl ArchiveStore {
    pub fn new(settings: ArchiveSettings) -> Self {
        let tracked: HashSet<String> = settings.tracked.into_iter().collect();
        let series = tracked
            .iter()
            .map(|k| (k.clone(), VecDeque::new()))
            .collect();
        Self {
            tracked,
            archive_interval: settings.archive_interval,
            max_points: settings.max_points,
            max_future_skew: settings.max_future_skew,
            inner: RwLock::new(ArchiveInner {
                series,
                last_archived: HashMap::new(),
            }),
            points_archived_total: AtomicU64::new(0),
        }
    }

    pub fn is_tracked(&self, metric_key: &str) -> bool {
        self.tracked.contains(metric_key)
    }

    /// Stores a point when the metric is tracked, the archive interval has elapsed since the
    /// last append, and the value is numeric. Late points are inserted at their sorted position;
    /// points stamped beyond `now + max_future_skew` are refused. Returns whether a point was stored.
    pub async fn record(
        &self,
        metric_key: &str,
        value: &SampleValue,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_tracked(metric_key) {
            return false;
        }
        let mut inner = self.inner.write().await;
        if let Some(last) = inner.last_archived.get(metric_key)
            && now - *last < self.archive_interval
        {
            return false;
        }
        let Some(number) = value.as_number() else {
            return false;
        };
        if timestamp > now + self.max_future_skew {
            tracing::debug!(metric_key, %timestamp, "future-stamped sample not archived");
            return false;
        }
        let point = ArchivePoint::new(timestamp, number);
        let series = inner.series.entry(metric_key.to_string()).or_default();
        let at = series.partition_point(|p| p.timestamp_ms <= point.timestamp_ms);
        series.insert(at, point);
        while series.len() > self.max_points {
            series.pop_front();
        }
        inner.last_archived.insert(metric_key.to_string(), now);
        self.points_archived_total.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Drops points older than `retention_days` before `now`. Returns how many were removed.
    #[instrument(skip(self), fields(repo = "archive", operation = "prune"))]
    pub async fn prune(&self, retention_days: u32, now: DateTime<Utc>) -> usize {
        let cutoff = to_millis(now) - (retention_days as i64) * MS_PER_DAY;
        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for series in inner.series.values_mut() {
            // Series are timestamp-ascending, so expired points sit at the front.
            while series.front().is_some_and(|p| p.timestamp_ms < cutoff) {
                series.pop_front();
                removed += 1;
            }
        }
        removed
    }

    /// Points with `from <= timestamp <= to`, oldest first.
    pub async fn query(
        &self,
        metric_key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<ArchivePoint> {
        let (from_ms, to_ms) = (to_millis(from), to_millis(to));
        let inner = self.inner.read().await;
        inner
            .series
            .get(metric_key)
            .map(|s| {
                s.iter()
                    .filter(|p| p.timestamp_ms >= from_ms && p.timestamp_ms <= to_ms)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Points at or after `since` (all points when `since` is None).
    pub async fn series_since(
        &self,
        metric_key: &str,
        since: Option<DateTime<Utc>>,
    ) -> Vec<ArchivePoint> {
        let since_ms = since.map(to_millis).unwrap_or(i64::MIN);
        let inner = self.inner.read().await;
        inner
            .series
            .get(metric_key)
            .map(|s| {
                s.iter()
                    .filter(|p| p.timestamp_ms >= since_ms)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn len(&self, metric_key: &str) -> usize {
        self.inner
            .read()
            .await
            .series
            .get(metric_key)
            .map_or(0, VecDeque::len)
    }

    /// Consistent copy of every series for persistence.
    pub async fn snapshot(&self) -> HashMap<String, Vec<ArchivePoint>> {
        let inner = self.inner.read().await;
        inner
            .series
            .iter()
            .map(|(k, s)| (k.clone(), s.iter().copied().collect()))
            .collect()
    }

    /// Replaces in-memory series with loaded data. Untracked keys are ignored; every tracked key
    /// ends up with a series (empty when nothing was loaded for it).
    pub async fn restore(&self, loaded: HashMap<String, Vec<ArchivePoint>>) {
        let mut inner = self.inner.write().await;
        let mut series: HashMap<String, VecDeque<ArchivePoint>> = self
            .tracked
            .iter()
            .map(|k| (k.clone(), VecDeque::new()))
            .collect();
        for (key, mut points) in loaded {
            let Some(slot) = series.get_mut(&key) else {
                continue;
            };
            points.retain(|p| p.value.is_finite());
            points.sort_by_key(|p| p.timestamp_ms);
            let skip = points.len().saturating_sub(self.max_points);
            slot.extend(points.into_iter().skip(skip));
        }
        inner.series = series;
        inner.last_archived.clear();
    }

    /// Loads from `db`, falling back to empty series on any error.
    pub async fn load_from(&self, db: &ArchiveDb) {
        match db.load_all().await {
            Ok(loaded) => {
                let total: usize = loaded.values().map(Vec::len).sum();
                self.restore(loaded).await;
                tracing::info!(points = total, "archive loaded");
            }
            Err(e) => {
                tracing::warn!(error = %e, operation = "load_archive", "archive load failed, starting empty");
                self.restore(HashMap::new()).await;
            }
        }
    }

    pub async fn persist_to(&self, db: &ArchiveDb, now: DateTime<Utc>) -> anyhow::Result<()> {
        let snapshot = self.snapshot().await;
        db.save_all(&snapshot, to_millis(now)).await
    }

    pub fn points_archived_total(&self) -> u64 {
        self.points_archived_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn store(max_points: usize) -> ArchiveStore {
        ArchiveStore::new(ArchiveSettings {
            tracked: vec!["battery_soc".into(), "solar_power".into()],
            archive_interval: Duration::seconds(60),
            max_points,
            max_future_skew: Duration::minutes(5),
        })
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn untracked_metric_is_ignored() {
        let s = store(10);
        assert!(!s.record("inverter_mode", &42.0.into(), t0(), t0()).await);
        assert!(s.snapshot().await.get("inverter_mode").is_none());
    }

    #[tokio::test]
    async fn throttles_on_wall_clock_watermark() {
        let s = store(10);
        let now = t0();
        assert!(s.record("battery_soc", &50.0.into(), now, now).await);
        // Sample timestamps far apart do not matter; only wall-clock elapsed does.
        let later_ts = now + Duration::hours(3);
        assert!(
            !s.record("battery_soc", &51.0.into(), later_ts, now + Duration::seconds(59))
                .await
        );
        assert!(
            s.record("battery_soc", &52.0.into(), later_ts, now + Duration::seconds(60))
                .await
        );
        assert_eq!(s.len("battery_soc").await, 2);
    }

    #[tokio::test]
    async fn non_numeric_value_does_not_advance_watermark() {
        let s = store(10);
        let now = t0();
        assert!(!s.record("battery_soc", &"n/a".into(), now, now).await);
        assert!(s.record("battery_soc", &"55.5".into(), now, now).await);
        let points = s.series_since("battery_soc", None).await;
        assert_eq!(points[0].value, 55.5);
    }

    #[tokio::test]
    async fn length_cap_evicts_oldest() {
        let s = store(3);
        for i in 0..5 {
            let now = t0() + Duration::minutes(i);
            s.record("solar_power", &(i as f64).into(), now, now).await;
        }
        let values: Vec<f64> = s
            .series_since("solar_power", None)
            .await
            .iter()
            .map(|p| p.value)
            .collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn query_bounds_are_inclusive() {
        let s = store(100);
        for i in 0..5 {
            let now = t0() + Duration::minutes(i);
            s.record("solar_power", &(i as f64 * 100.0).into(), now, now)
                .await;
        }
        let out = s
            .query("solar_power", t0() + Duration::minutes(1), t0() + Duration::minutes(3))
            .await;
        let values: Vec<f64> = out.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![100.0, 200.0, 300.0]);
    }

    #[tokio::test]
    async fn late_sample_is_inserted_in_order() {
        let s = store(10);
        let now = t0();
        s.record("solar_power", &300.0.into(), now, now).await;
        let late = now - Duration::minutes(10);
        assert!(
            s.record("solar_power", &100.0.into(), late, now + Duration::minutes(1))
                .await
        );
        let values: Vec<f64> = s
            .series_since("solar_power", None)
            .await
            .iter()
            .map(|p| p.value)
            .collect();
        assert_eq!(values, vec![100.0, 300.0]);
    }

    #[tokio::test]
    async fn far_future_sample_is_refused_and_does_not_block_later_points() {
        let s = store(2_000);
        let now = t0();
        let skewed = now + Duration::days(5 * 365);
        assert!(!s.record("solar_power", &999.0.into(), skewed, now).await);
        for i in 0..1_440 {
            let at = now + Duration::minutes(i);
            assert!(s.record("solar_power", &(i as f64).into(), at, at).await);
        }
        let day = s
            .query("solar_power", now, now + Duration::days(1))
            .await;
        assert_eq!(day.len(), 1_440);
        assert!(day.iter().all(|p| p.value < 999.0));
    }

    #[tokio::test]
    async fn small_clock_skew_is_archived() {
        let s = store(10);
        let now = t0();
        assert!(
            s.record("battery_soc", &60.0.into(), now + Duration::minutes(2), now)
                .await
        );
    }

    #[tokio::test]
    async fn restore_sorts_caps_and_fills_tracked_keys() {
        let s = store(2);
        let mut loaded = HashMap::new();
        loaded.insert(
            "battery_soc".to_string(),
            vec![
                ArchivePoint::new(t0() + Duration::minutes(2), 3.0),
                ArchivePoint::new(t0(), 1.0),
                ArchivePoint::new(t0() + Duration::minutes(1), 2.0),
            ],
        );
        loaded.insert("stale_key".to_string(), vec![ArchivePoint::new(t0(), 9.0)]);
        s.restore(loaded).await;
        let snap = s.snapshot().await;
        assert_eq!(snap.len(), 2);
        let soc: Vec<f64> = snap["battery_soc"].iter().map(|p| p.value).collect();
        assert_eq!(soc, vec![2.0, 3.0]);
        assert!(snap["solar_power"].is_empty());
    }
}
