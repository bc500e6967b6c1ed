// Field selectors for historical series
//
// A history point carries the whole object of one metric family. Charts need
// a single number per point, so each selectable field knows its family, where
// the number lives inside the object, and how to scale it for display.

use crate::history::types::{DatasetPoint, HistoryPoint, MetricType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A chartable field of a historical metric family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    CpuUsage,
    MemoryUsage,
    NetworkUp,
    NetworkDown,
    DiskRead,
    DiskWrite,
    PerfIpc,
    PerfL1dMissRate,
    PerfLlcMissRate,
    MemoryPageIoBytes,
    MemorySwapIoBytes,
}

impl MetricField {
    pub const ALL: [MetricField; 11] = [
        MetricField::CpuUsage,
        MetricField::MemoryUsage,
        MetricField::NetworkUp,
        MetricField::NetworkDown,
        MetricField::DiskRead,
        MetricField::DiskWrite,
        MetricField::PerfIpc,
        MetricField::PerfL1dMissRate,
        MetricField::PerfLlcMissRate,
        MetricField::MemoryPageIoBytes,
        MetricField::MemorySwapIoBytes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuUsage => "cpu_usage",
            Self::MemoryUsage => "memory_usage",
            Self::NetworkUp => "network_up",
            Self::NetworkDown => "network_down",
            Self::DiskRead => "disk_read",
            Self::DiskWrite => "disk_write",
            Self::PerfIpc => "perf_ipc",
            Self::PerfL1dMissRate => "perf_l1d_miss_rate",
            Self::PerfLlcMissRate => "perf_llc_miss_rate",
            Self::MemoryPageIoBytes => "memory_page_io_bytes",
            Self::MemorySwapIoBytes => "memory_swap_io_bytes",
        }
    }

    /// Family this field belongs to
    pub fn metric_type(&self) -> MetricType {
        match self {
            Self::CpuUsage => MetricType::Cpu,
            Self::MemoryUsage => MetricType::Memory,
            Self::NetworkUp | Self::NetworkDown => MetricType::Network,
            Self::DiskRead | Self::DiskWrite => MetricType::Disk,
            Self::PerfIpc | Self::PerfL1dMissRate | Self::PerfLlcMissRate => MetricType::PerfEvents,
            Self::MemoryPageIoBytes | Self::MemorySwapIoBytes => MetricType::MemoryBandwidth,
        }
    }

    /// JSON pointer inside the family object
    pub fn pointer(&self) -> &'static str {
        match self {
            Self::CpuUsage | Self::MemoryUsage => "/usage_percent",
            Self::NetworkUp => "/bytes_sent_per_sec",
            Self::NetworkDown => "/bytes_recv_per_sec",
            Self::DiskRead => "/io/read_bytes_per_sec",
            Self::DiskWrite => "/io/write_bytes_per_sec",
            Self::PerfIpc => "/ipc",
            Self::PerfL1dMissRate => "/l1d_miss_rate",
            Self::PerfLlcMissRate => "/llc_miss_rate",
            Self::MemoryPageIoBytes => "/page_io_bytes_per_sec",
            Self::MemorySwapIoBytes => "/swap_io_bytes_per_sec",
        }
    }

    pub fn scale(&self) -> f64 {
        match self {
            Self::PerfL1dMissRate | Self::PerfLlcMissRate => 100.0,
            _ => 1.0,
        }
    }

    /// Read this field from one family object
    pub fn select(&self, data: &Value) -> Option<f64> {
        data.pointer(self.pointer())
            .and_then(Value::as_f64)
            .map(|v| v * self.scale())
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown field: {}", s))
    }
}

/// Fields that can be charted for a metric family
pub fn fields_for(metric_type: MetricType) -> Vec<MetricField> {
    MetricField::ALL
        .into_iter()
        .filter(|f| f.metric_type() == metric_type)
        .collect()
}

/// Project history points onto one field
pub fn extract(points: &[HistoryPoint], field: MetricField) -> Vec<DatasetPoint> {
    points
        .iter()
        .map(|p| DatasetPoint {
            timestamp: p.timestamp.clone(),
            value: field.select(&p.data),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn history_point(ts: &str, data: Value) -> HistoryPoint {
        HistoryPoint {
            timestamp: ts.into(),
            data,
        }
    }

    #[test]
    fn test_every_family_has_fields() {
        for metric_type in MetricType::ALL {
            assert!(!fields_for(metric_type).is_empty(), "{}", metric_type);
        }
        assert_eq!(
            fields_for(MetricType::Disk),
            vec![MetricField::DiskRead, MetricField::DiskWrite]
        );
    }

    #[test]
    fn test_extract_with_missing_fields() {
        let points = vec![
            history_point("2025-01-18T14:30:00Z", json!({"io": {"read_bytes_per_sec": 512.0}})),
            history_point("2025-01-18T14:30:05Z", json!({"io": {}})),
            history_point("2025-01-18T14:30:10Z", Value::Null),
        ];

        let values: Vec<_> = extract(&points, MetricField::DiskRead)
            .into_iter()
            .map(|p| p.value)
            .collect();

        assert_eq!(values, vec![Some(512.0), None, None]);
    }

    #[test]
    fn test_names_match_serde() {
        for field in MetricField::ALL {
            let json = serde_json::to_string(&field).unwrap();
            assert_eq!(json, format!("\"{}\"", field));
            assert_eq!(field.as_str().parse::<MetricField>().unwrap(), field);
        }
        assert!("cpu".parse::<MetricField>().is_err());
    }

    #[test]
    fn test_miss_rate_fields_are_percent() {
        let data = json!({"l1d_miss_rate": 0.25, "llc_miss_rate": 0.5, "ipc": 2.0});
        assert_eq!(MetricField::PerfL1dMissRate.select(&data), Some(25.0));
        assert_eq!(MetricField::PerfLlcMissRate.select(&data), Some(50.0));
        assert_eq!(MetricField::PerfIpc.select(&data), Some(2.0));
    }
}
