// Frame parsing and sample decoding for the live stream
//
// Expected inbound frames:
// {
//   "type": "metrics",
//   "timestamp": "2025-01-18T14:30:05Z",
//   "data": { "cpu": {...}, "memory": {...}, "network": {...}, "disk": {...},
//             "perf_events": {...}, "memory_bandwidth": {...} }
// }
// { "type": "pong" }
//
// Every metric family is optional and so is every field inside it. Decoding
// never fails because something is missing; the channel just reads `None`.

use crate::history::types::RawTimestamp;
use crate::streaming::channel::{Channel, ChannelValues};
use crate::streaming::types::{StreamError, StreamResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One timestamped multi-channel reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub channels: ChannelValues,
}

/// Frames sent by the metrics server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Metrics {
        #[serde(default)]
        timestamp: Option<RawTimestamp>,
        #[serde(default)]
        data: Value,
    },
    Pong,
    /// Any other `type`; ignored
    #[serde(other)]
    Unknown,
}

/// Frames sent to the metrics server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Ping,
}

impl OutboundFrame {
    pub fn to_json(&self) -> StreamResult<String> {
        serde_json::to_string(self).map_err(|e| StreamError::Parse(e.to_string()))
    }
}

/// Latest raw object of each metric family, for detail widgets
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricFamilies {
    pub cpu: Option<Value>,
    pub memory: Option<Value>,
    pub network: Option<Value>,
    pub disk: Option<Value>,
    pub perf_events: Option<Value>,
    pub memory_bandwidth: Option<Value>,
    pub last_update: Option<DateTime<Utc>>,
}

impl MetricFamilies {
    pub fn from_data(data: &Value, timestamp: DateTime<Utc>) -> Self {
        let family = |name: &str| data.get(name).filter(|v| !v.is_null()).cloned();
        Self {
            cpu: family("cpu"),
            memory: family("memory"),
            network: family("network"),
            disk: family("disk"),
            perf_events: family("perf_events"),
            memory_bandwidth: family("memory_bandwidth"),
            last_update: Some(timestamp),
        }
    }
}

/// Parse a text frame
pub fn parse_frame(text: &str) -> StreamResult<InboundFrame> {
    serde_json::from_str(text).map_err(|e| StreamError::Parse(format!("Invalid JSON frame: {}", e)))
}

/// Project a frame's `data` object onto the flat channel map
pub fn decode_channels(data: &Value) -> ChannelValues {
    let mut values = ChannelValues::new();
    for channel in Channel::ALL {
        let raw = data.pointer(channel.source_pointer()).and_then(Value::as_f64);
        values.set(channel, raw.map(|v| v * channel.scale()));
    }
    values
}

pub fn decode_sample(data: &Value, timestamp: DateTime<Utc>) -> Sample {
    Sample {
        timestamp,
        channels: decode_channels(data),
    }
}

/// Frame timestamp, falling back to the receipt time
pub fn frame_timestamp(raw: Option<&RawTimestamp>) -> DateTime<Utc> {
    match raw.and_then(RawTimestamp::to_datetime) {
        Some(ts) => ts,
        None => {
            tracing::debug!("Frame timestamp missing or invalid, using receipt time");
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cpu_only_payload() {
        let data = json!({"cpu": {"usage_percent": 55.2}});
        let values = decode_channels(&data);

        assert_eq!(values.get(Channel::Cpu), Some(55.2));
        for channel in Channel::ALL.into_iter().filter(|c| *c != Channel::Cpu) {
            assert_eq!(values.get(channel), None, "{}", channel);
        }
    }

    #[test]
    fn test_miss_rates_become_percentages() {
        let data = json!({
            "perf_events": {
                "ipc": 1.5,
                "l1d_miss_rate": 0.0123,
                "llc_miss_rate": 0.5,
                "branch_miss_rate": 0.02,
                "dtlb_miss_rate": 0.0
            }
        });
        let values = decode_channels(&data);

        assert!((values.get(Channel::L1dMissRate).unwrap() - 1.23).abs() < 1e-9);
        assert_eq!(values.get(Channel::LlcMissRate), Some(50.0));
        assert!((values.get(Channel::BranchMissRate).unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(values.get(Channel::DtlbMissRate), Some(0.0));
        assert_eq!(values.get(Channel::Ipc), Some(1.5));
    }

    #[test]
    fn test_nested_and_null_families() {
        let data = json!({
            "disk": {"io": {"read_bytes_per_sec": 1024.0}},
            "network": null,
            "memory_bandwidth": {"pgpgin_per_sec": 12, "pswpout_per_sec": "n/a"},
            "perf_events": {"available": false}
        });
        let values = decode_channels(&data);

        assert_eq!(values.get(Channel::DiskRead), Some(1024.0));
        assert_eq!(values.get(Channel::DiskWrite), None);
        assert_eq!(values.get(Channel::NetworkUp), None);
        assert_eq!(values.get(Channel::PageIn), Some(12.0));
        assert_eq!(values.get(Channel::SwapOut), None);
        assert_eq!(values.get(Channel::L1dMissRate), None);
    }

    #[test]
    fn test_parse_frames() {
        let frame = parse_frame(
            r#"{"type":"metrics","timestamp":"2025-01-18T14:30:05Z","data":{"cpu":{"usage_percent":3}}}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Metrics { timestamp, data } => {
                assert!(timestamp.is_some());
                assert_eq!(decode_channels(&data).get(Channel::Cpu), Some(3.0));
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        assert_eq!(parse_frame(r#"{"type":"pong"}"#).unwrap(), InboundFrame::Pong);
        assert_eq!(
            parse_frame(r#"{"type":"welcome","motd":"hi"}"#).unwrap(),
            InboundFrame::Unknown
        );
        assert!(matches!(parse_frame("not json"), Err(StreamError::Parse(_))));
        assert!(parse_frame(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn test_metrics_frame_without_data() {
        let frame = parse_frame(r#"{"type":"metrics"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Metrics {
                timestamp: None,
                data: Value::Null
            }
        );
        assert_eq!(decode_channels(&Value::Null).present(), 0);
    }

    #[test]
    fn test_ping_frame() {
        assert_eq!(OutboundFrame::Ping.to_json().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_families_treat_null_as_absent() {
        let ts = Utc::now();
        let data = json!({"cpu": {"usage_percent": 1}, "disk": null});
        let families = MetricFamilies::from_data(&data, ts);
        assert!(families.cpu.is_some());
        assert!(families.disk.is_none());
        assert!(families.memory_bandwidth.is_none());
        assert_eq!(families.last_update, Some(ts));
    }
}
