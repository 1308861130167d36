use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

/// Raw telemetry value. Numbers stay numbers; anything else is kept as text for the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Text(String),
}

impl SampleValue {
    /// Finite numeric view of the value; numeric strings ("42.5") parse too.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            SampleValue::Number(v) => Some(*v).filter(|v| v.is_finite()),
            SampleValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }
}

impl From<f64> for SampleValue {
    fn from(v: f64) -> Self {
        SampleValue::Number(v)
    }
}

impl From<&str> for SampleValue {
    fn from(v: &str) -> Self {
        SampleValue::Text(v.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub metric_key: String,
    pub value: SampleValue,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(
        metric_key: impl Into<String>,
        value: impl Into<SampleValue>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            metric_key: metric_key.into(),
            value: value.into(),
            timestamp,
        }
    }
}

/// Sample as received over HTTP/WS; the timestamp is optional on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingSample {
    pub metric_key: String,
    pub value: SampleValue,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl IncomingSample {
    pub fn into_sample(self, received_at: DateTime<Utc>) -> Sample {
        Sample {
            metric_key: self.metric_key,
            value: self.value,
            timestamp: self.timestamp.unwrap_or(received_at),
        }
    }
}

/// One archived point. Timestamp is epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct ArchivePoint {
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    pub value: f64,
}

impl ArchivePoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp_ms: to_millis(timestamp),
            value,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        from_millis(self.timestamp_ms)
    }
}

pub fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
