use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub charger: ChargerConfig,
    #[serde(default)]
    pub peak_discharge: PeakDischargeConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Samples buffered between the HTTP/WS ingestion surface and the ingestion worker.
    #[serde(default = "default_ingest_channel_capacity")]
    pub ingest_channel_capacity: usize,
    /// Max number of samples kept in the broadcast channel for /ws/live (slow clients may lag).
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_ingest_channel_capacity() -> usize {
    256
}

fn default_broadcast_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub archive_db_path: String,
    pub state_path: String,
    #[serde(default = "default_archive_interval_secs")]
    pub archive_interval_secs: u64,
    #[serde(default = "default_max_points_per_series")]
    pub max_points_per_series: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// How often the archive is pruned and everything is written to disk.
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,
    /// Samples stamped further than this ahead of the wall clock are not archived.
    #[serde(default = "default_max_future_skew_secs")]
    pub max_future_skew_secs: u64,
}

fn default_archive_interval_secs() -> u64 {
    60
}

fn default_max_points_per_series() -> usize {
    10_000
}

fn default_retention_days() -> u32 {
    365
}

fn default_persist_interval_secs() -> u64 {
    60
}

fn default_max_future_skew_secs() -> u64 {
    300
}

/// Maps a cumulative-energy counter (kWh) to the instantaneous power metric (W) it integrates.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EnergyPair {
    pub cumulative_key: String,
    pub power_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Allow-list of metric keys archived as time series.
    #[serde(default = "default_tracked")]
    pub tracked: Vec<String>,
    #[serde(default = "default_soc_key")]
    pub soc_key: String,
    #[serde(default = "default_solar_power_key")]
    pub solar_power_key: String,
    #[serde(default = "default_load_power_key")]
    pub load_power_key: String,
    #[serde(default = "default_battery_power_key")]
    pub battery_power_key: String,
    #[serde(default = "default_temperature_key")]
    pub temperature_key: String,
    #[serde(default = "default_energy_pairs")]
    pub energy: Vec<EnergyPair>,
}

fn default_tracked() -> Vec<String> {
    [
        "battery_soc",
        "battery_voltage",
        "battery_power",
        "solar_power",
        "load_power",
        "battery_temperature",
        "solar_energy_today",
        "load_energy_today",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_soc_key() -> String {
    "battery_soc".into()
}

fn default_solar_power_key() -> String {
    "solar_power".into()
}

fn default_load_power_key() -> String {
    "load_power".into()
}

fn default_battery_power_key() -> String {
    "battery_power".into()
}

fn default_temperature_key() -> String {
    "battery_temperature".into()
}

fn default_energy_pairs() -> Vec<EnergyPair> {
    vec![
        EnergyPair {
            cumulative_key: "solar_energy_today".into(),
            power_key: "solar_power".into(),
        },
        EnergyPair {
            cumulative_key: "load_energy_today".into(),
            power_key: "load_power".into(),
        },
    ]
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            tracked: default_tracked(),
            soc_key: default_soc_key(),
            solar_power_key: default_solar_power_key(),
            load_power_key: default_load_power_key(),
            battery_power_key: default_battery_power_key(),
            temperature_key: default_temperature_key(),
            energy: default_energy_pairs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatteryConfig {
    #[serde(default = "default_capacity_ah")]
    pub capacity_ah: f64,
    #[serde(default = "default_voltage")]
    pub voltage: f64,
    /// Rated output of the solar array, for the array percentage.
    #[serde(default = "default_array_capacity_w")]
    pub array_capacity_w: f64,
}

fn default_capacity_ah() -> f64 {
    100.0
}

fn default_voltage() -> f64 {
    12.8
}

fn default_array_capacity_w() -> f64 {
    800.0
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_ah: default_capacity_ah(),
            voltage: default_voltage(),
            array_capacity_w: default_array_capacity_w(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Master switch; when false no battery alerts transition or notify.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_alert_low")]
    pub low_threshold: f64,
    #[serde(default = "default_alert_high")]
    pub high_threshold: f64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_true() -> bool {
    true
}

fn default_alert_low() -> f64 {
    30.0
}

fn default_alert_high() -> f64 {
    80.0
}

fn default_history_limit() -> usize {
    50
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            low_threshold: default_alert_low(),
            high_threshold: default_alert_high(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Maker-webhook key; automation is inert without it.
    #[serde(default)]
    pub webhook_key: Option<String>,
    #[serde(default = "default_webhook_base_url")]
    pub webhook_base_url: String,
    #[serde(default = "default_charger_low")]
    pub low_threshold: f64,
    #[serde(default = "default_charger_high")]
    pub high_threshold: f64,
    /// Battery temperature (°C) above which no automatic switching happens.
    #[serde(default = "default_max_temp")]
    pub max_temp: f64,
    /// Temperature readings older than this count as missing.
    #[serde(default = "default_temp_max_age_secs")]
    pub temp_max_age_secs: u64,
    /// Refuse automatic switching while no usable temperature reading exists.
    #[serde(default)]
    pub block_without_temp: bool,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_webhook_base_url() -> String {
    "https://maker.ifttt.com".into()
}

fn default_charger_low() -> f64 {
    25.0
}

fn default_charger_high() -> f64 {
    95.0
}

fn default_max_temp() -> f64 {
    45.0
}

fn default_temp_max_age_secs() -> u64 {
    900
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    5
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_key: None,
            webhook_base_url: default_webhook_base_url(),
            low_threshold: default_charger_low(),
            high_threshold: default_charger_high(),
            max_temp: default_max_temp(),
            temp_max_age_secs: default_temp_max_age_secs(),
            block_without_temp: false,
            cooldown_secs: default_cooldown_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ChargerConfig {
    /// Feature flag on and a non-empty credential present.
    pub fn is_armed(&self) -> bool {
        self.enabled && self.webhook_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeakDischargeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Battery power (W) below which the battery counts as discharging. Negative = discharge.
    #[serde(default = "default_discharge_threshold_w")]
    pub discharge_threshold_w: f64,
    #[serde(default = "default_min_duration_mins")]
    pub min_duration_mins: u64,
    /// Local solar noon as fractional hours (12.5 = 12:30).
    #[serde(default = "default_solar_noon_hour")]
    pub solar_noon_hour: f64,
    #[serde(default = "default_summer_start_month")]
    pub summer_start_month: u32,
    #[serde(default = "default_summer_end_month")]
    pub summer_end_month: u32,
    #[serde(default = "default_summer_window_hours")]
    pub summer_window_hours: f64,
    #[serde(default = "default_winter_window_hours")]
    pub winter_window_hours: f64,
}

fn default_discharge_threshold_w() -> f64 {
    -50.0
}

fn default_min_duration_mins() -> u64 {
    30
}

fn default_solar_noon_hour() -> f64 {
    12.5
}

fn default_summer_start_month() -> u32 {
    4
}

fn default_summer_end_month() -> u32 {
    9
}

fn default_summer_window_hours() -> f64 {
    5.0
}

fn default_winter_window_hours() -> f64 {
    4.0
}

impl Default for PeakDischargeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            discharge_threshold_w: default_discharge_threshold_w(),
            min_duration_mins: default_min_duration_mins(),
            solar_noon_hour: default_solar_noon_hour(),
            summer_start_month: default_summer_start_month(),
            summer_end_month: default_summer_end_month(),
            summer_window_hours: default_summer_window_hours(),
            winter_window_hours: default_winter_window_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    /// Endpoint receiving `{subject, body}` JSON. Unset = log only.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cron expression (with seconds field) in local time.
    #[serde(default = "default_summary_schedule")]
    pub schedule: String,
}

fn default_summary_schedule() -> String {
    "0 0 21 * * *".into()
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_summary_schedule(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log app stats (samples ingested, points archived, ws clients) at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

fn default_stats_log_interval_secs() -> u64 {
    300
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            stats_log_interval_secs: default_stats_log_interval_secs(),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            self.server.ingest_channel_capacity > 0,
            "server.ingest_channel_capacity must be > 0, got {}",
            self.server.ingest_channel_capacity
        );
        anyhow::ensure!(
            self.server.broadcast_capacity > 0,
            "server.broadcast_capacity must be > 0, got {}",
            self.server.broadcast_capacity
        );
        anyhow::ensure!(
            !self.storage.archive_db_path.is_empty(),
            "storage.archive_db_path must be non-empty"
        );
        anyhow::ensure!(
            !self.storage.state_path.is_empty(),
            "storage.state_path must be non-empty"
        );
        anyhow::ensure!(
            self.storage.archive_interval_secs > 0,
            "storage.archive_interval_secs must be > 0, got {}",
            self.storage.archive_interval_secs
        );
        anyhow::ensure!(
            self.storage.max_points_per_series > 0,
            "storage.max_points_per_series must be > 0, got {}",
            self.storage.max_points_per_series
        );
        anyhow::ensure!(
            self.storage.retention_days > 0,
            "storage.retention_days must be > 0, got {}",
            self.storage.retention_days
        );
        anyhow::ensure!(
            self.storage.persist_interval_secs > 0,
            "storage.persist_interval_secs must be > 0, got {}",
            self.storage.persist_interval_secs
        );
        anyhow::ensure!(
            self.alerts.low_threshold < self.alerts.high_threshold,
            "alerts.low_threshold ({}) must be below alerts.high_threshold ({})",
            self.alerts.low_threshold,
            self.alerts.high_threshold
        );
        anyhow::ensure!(
            self.alerts.history_limit > 0,
            "alerts.history_limit must be > 0, got {}",
            self.alerts.history_limit
        );
        anyhow::ensure!(
            self.charger.low_threshold < self.charger.high_threshold,
            "charger.low_threshold ({}) must be below charger.high_threshold ({})",
            self.charger.low_threshold,
            self.charger.high_threshold
        );
        anyhow::ensure!(
            self.charger.request_timeout_secs > 0,
            "charger.request_timeout_secs must be > 0, got {}",
            self.charger.request_timeout_secs
        );
        anyhow::ensure!(
            self.battery.capacity_ah >= 0.0 && self.battery.voltage >= 0.0,
            "battery.capacity_ah and battery.voltage must be >= 0"
        );
        let pd = &self.peak_discharge;
        anyhow::ensure!(
            (1..=12).contains(&pd.summer_start_month) && (1..=12).contains(&pd.summer_end_month),
            "peak_discharge summer months must be 1..=12, got {}..{}",
            pd.summer_start_month,
            pd.summer_end_month
        );
        anyhow::ensure!(
            pd.summer_window_hours > 0.0 && pd.winter_window_hours > 0.0,
            "peak_discharge window hours must be > 0"
        );
        anyhow::ensure!(
            (0.0..24.0).contains(&pd.solar_noon_hour),
            "peak_discharge.solar_noon_hour must be in 0..24, got {}",
            pd.solar_noon_hour
        );
        anyhow::ensure!(
            self.notifications.timeout_secs > 0,
            "notifications.timeout_secs must be > 0, got {}",
            self.notifications.timeout_secs
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        if self.summary.enabled {
            <cron::Schedule as std::str::FromStr>::from_str(&self.summary.schedule).map_err(
                |e| anyhow::anyhow!("summary.schedule {:?} is not a valid cron expression: {}", self.summary.schedule, e),
            )?;
        }
        for pair in &self.metrics.energy {
            anyhow::ensure!(
                !pair.cumulative_key.is_empty() && !pair.power_key.is_empty(),
                "metrics.energy entries need cumulative_key and power_key"
            );
        }
        Ok(())
    }
}
