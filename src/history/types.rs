// Wire types of the historical metrics API

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A timestamp as it appears on the wire: ISO-8601 text, a numeric
/// epoch-millisecond string, or a JSON number of epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(f64),
    Text(String),
}

impl RawTimestamp {
    /// Milliseconds since the Unix epoch, or `None` when the value does not
    /// describe a finite instant
    pub fn to_millis(&self) -> Option<f64> {
        let ms = match self {
            Self::Millis(ms) => *ms,
            Self::Text(text) => parse_text_millis(text.trim())?,
        };
        ms.is_finite().then_some(ms)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let ms = self.to_millis()?;
        DateTime::from_timestamp_millis(ms.floor() as i64)
    }
}

fn parse_text_millis(text: &str) -> Option<f64> {
    if text.is_empty() {
        return None;
    }
    if let Ok(ms) = text.parse::<f64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis() as f64);
    }
    // Offset-less date-times are read as UTC
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_millis() as f64);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis() as f64)
}

impl From<DateTime<Utc>> for RawTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::Text(dt.to_rfc3339())
    }
}

impl From<&str> for RawTimestamp {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<i64> for RawTimestamp {
    fn from(ms: i64) -> Self {
        Self::Millis(ms as f64)
    }
}

/// Metric families stored by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Cpu,
    Memory,
    Network,
    Disk,
    PerfEvents,
    MemoryBandwidth,
}

impl MetricType {
    pub const ALL: [MetricType; 6] = [
        MetricType::Cpu,
        MetricType::Memory,
        MetricType::Network,
        MetricType::Disk,
        MetricType::PerfEvents,
        MetricType::MemoryBandwidth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Network => "network",
            Self::Disk => "disk",
            Self::PerfEvents => "perf_events",
            Self::MemoryBandwidth => "memory_bandwidth",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricType::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown metric type: {}", s))
    }
}

/// Length of the current period in a relative comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonPeriod {
    Hour,
    Day,
    Week,
}

impl ComparisonPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
        }
    }
}

impl fmt::Display for ComparisonPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            other => Err(format!("unknown period: {}", other)),
        }
    }
}

/// Server-side aggregation interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationInterval {
    #[serde(rename = "5s")]
    FiveSeconds,
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "auto")]
    Auto,
}

impl AggregationInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FiveSeconds => "5s",
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::OneHour => "1h",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for AggregationInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5s" => Ok(Self::FiveSeconds),
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "1h" => Ok(Self::OneHour),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown interval: {}", other)),
        }
    }
}

/// A single stored snapshot of one metric family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: RawTimestamp,
    #[serde(default)]
    pub data: Value,
}

/// Response of `GET /api/history/metrics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub metric_type: MetricType,
    pub start_time: Option<RawTimestamp>,
    pub end_time: Option<RawTimestamp>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub data_points: Vec<HistoryPoint>,
}

/// One side of a comparison
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSeries {
    #[serde(default)]
    pub start_time: Option<RawTimestamp>,
    #[serde(default)]
    pub end_time: Option<RawTimestamp>,
    #[serde(default)]
    pub data_points: Vec<HistoryPoint>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub current_avg: Option<f64>,
    pub comparison_avg: Option<f64>,
    pub change_percent: Option<f64>,
}

/// Response of `GET /api/history/compare`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResponse {
    pub metric_type: MetricType,
    pub period: String,
    /// `yesterday`, `last_week`, or `custom` for explicit ranges
    pub compare_to: String,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub current: ComparisonSeries,
    #[serde(default)]
    pub comparison: ComparisonSeries,
    #[serde(default)]
    pub summary: ComparisonSummary,
}

/// One value of a single field extracted from a history series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetPoint {
    pub timestamp: RawTimestamp,
    pub value: Option<f64>,
}

impl DatasetPoint {
    pub fn new(timestamp: impl Into<RawTimestamp>, value: Option<f64>) -> Self {
        Self {
            timestamp: timestamp.into(),
            value,
        }
    }
}
