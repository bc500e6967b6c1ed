// Period-over-period alignment
//
// A comparison overlays the current period with the same field from a prior
// period. Both series are keyed by one-second buckets; the prior series is
// moved forward by the shift so that "this time yesterday" lands on "now".

use crate::history::types::{ComparisonSummary, DatasetPoint, RawTimestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const BUCKET_MS: i64 = 1000;

/// Fixed offset to the prior period.
///
/// Offsets are exact millisecond durations, not calendar arithmetic, so a
/// daylight-saving change inside the window shifts the overlay by an hour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonShift {
    #[default]
    None,
    Yesterday,
    LastWeek,
}

impl ComparisonShift {
    /// Offset in milliseconds; `None` for [`ComparisonShift::None`]
    pub fn duration_ms(&self) -> Option<i64> {
        match self {
            Self::None => None,
            Self::Yesterday => Some(DAY_MS),
            Self::LastWeek => Some(7 * DAY_MS),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Yesterday => "yesterday",
            Self::LastWeek => "last_week",
        }
    }
}

impl fmt::Display for ComparisonShift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonShift {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "yesterday" => Ok(Self::Yesterday),
            "last_week" => Ok(Self::LastWeek),
            other => Err(format!("unknown comparison shift: {}", other)),
        }
    }
}

/// Floor a timestamp to its one-second bucket, in epoch milliseconds.
///
/// Returns `None` when the timestamp does not parse to a finite instant.
pub fn normalize(ts: &RawTimestamp) -> Option<i64> {
    let ms = ts.to_millis()?;
    let bucket = (ms / BUCKET_MS as f64).floor() * BUCKET_MS as f64;
    // Out-of-range instants cannot share a bucket with anything real
    (bucket.abs() < i64::MAX as f64).then(|| bucket as i64)
}

/// Align `secondary` onto the timestamps of `primary`.
///
/// The result has one entry per primary point (same order) holding the
/// secondary value whose shifted bucket equals the primary bucket, or `None`.
/// An empty result means there is nothing to compare: no shift, or an empty
/// input. Duplicate secondary buckets resolve to the last point.
pub fn align(
    primary: &[DatasetPoint],
    secondary: &[DatasetPoint],
    shift: ComparisonShift,
) -> Vec<Option<f64>> {
    let Some(shift_ms) = shift.duration_ms() else {
        return Vec::new();
    };
    if primary.is_empty() || secondary.is_empty() {
        return Vec::new();
    }

    let mut shifted: HashMap<i64, Option<f64>> = HashMap::with_capacity(secondary.len());
    for point in secondary {
        if let Some(bucket) = normalize(&point.timestamp) {
            shifted.insert(bucket.saturating_add(shift_ms), point.value);
        }
    }

    primary
        .iter()
        .map(|point| {
            normalize(&point.timestamp)
                .and_then(|bucket| shifted.get(&bucket).copied())
                .flatten()
        })
        .collect()
}

/// Averages and relative change of two aligned series
pub fn summarize(current: &[Option<f64>], comparison: &[Option<f64>]) -> ComparisonSummary {
    let current_avg = mean(current);
    let comparison_avg = mean(comparison);
    ComparisonSummary {
        current_avg,
        comparison_avg,
        change_percent: change_percent(current_avg, comparison_avg),
    }
}

/// `(current - comparison) / comparison * 100`, undefined for a zero baseline
pub fn change_percent(current: Option<f64>, comparison: Option<f64>) -> Option<f64> {
    match (current, comparison) {
        (Some(current), Some(comparison)) if comparison != 0.0 => {
            Some((current - comparison) / comparison * 100.0)
        }
        _ => None,
    }
}

fn mean(values: &[Option<f64>]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_737_210_605_000;

    fn point(ms: i64, value: f64) -> DatasetPoint {
        DatasetPoint::new(ms, Some(value))
    }

    #[test]
    fn test_normalize_floors_to_second() {
        assert_eq!(normalize(&RawTimestamp::from(T + 999)), Some(T));
        assert_eq!(normalize(&RawTimestamp::from(T)), Some(T));
        assert_eq!(normalize(&RawTimestamp::from("2025-01-18T14:30:05.750Z")), Some(T));
        assert_eq!(normalize(&RawTimestamp::Millis(-1.0)), Some(-1000));
        assert_eq!(normalize(&RawTimestamp::from("garbage")), None);
    }

    #[test]
    fn test_yesterday_match() {
        let primary = vec![point(T, 10.0)];
        let secondary = vec![point(T - DAY_MS, 42.0)];

        assert_eq!(align(&primary, &secondary, ComparisonShift::Yesterday), vec![Some(42.0)]);
    }

    #[test]
    fn test_sub_second_jitter_still_matches() {
        let primary = vec![point(T + 120, 1.0)];
        let secondary = vec![DatasetPoint::new(
            RawTimestamp::from(T - 7 * DAY_MS + 870),
            Some(7.0),
        )];

        assert_eq!(align(&primary, &secondary, ComparisonShift::LastWeek), vec![Some(7.0)]);
    }

    #[test]
    fn test_length_follows_primary() {
        let primary: Vec<_> = (0..10).map(|i| point(T + i * 5000, i as f64)).collect();
        let secondary: Vec<_> = (0..3)
            .map(|i| point(T - DAY_MS + i * 5000, 100.0 + i as f64))
            .collect();

        let aligned = align(&primary, &secondary, ComparisonShift::Yesterday);

        assert_eq!(aligned.len(), primary.len());
        assert_eq!(&aligned[..4], &[Some(100.0), Some(101.0), Some(102.0), None]);
        assert!(aligned[3..].iter().all(Option::is_none));
    }

    #[test]
    fn test_no_match_is_null() {
        let primary = vec![point(T, 1.0), point(T + 1000, 2.0)];
        let secondary = vec![point(T - DAY_MS + 3000, 5.0)];

        assert_eq!(align(&primary, &secondary, ComparisonShift::Yesterday), vec![None, None]);
        // A day of data does not line up with a week shift
        assert_eq!(
            align(&[point(T, 1.0)], &[point(T - DAY_MS, 5.0)], ComparisonShift::LastWeek),
            vec![None]
        );
    }

    #[test]
    fn test_empty_cases() {
        let some = vec![point(T, 1.0)];
        assert!(align(&some, &some, ComparisonShift::None).is_empty());
        assert!(align(&[], &some, ComparisonShift::Yesterday).is_empty());
        assert!(align(&some, &[], ComparisonShift::Yesterday).is_empty());
    }

    #[test]
    fn test_invalid_timestamps_yield_null_and_are_skipped() {
        let primary = vec![
            DatasetPoint::new("not a time", Some(1.0)),
            point(T, 2.0),
        ];
        let secondary = vec![
            DatasetPoint::new("also not a time", Some(9.0)),
            point(T - DAY_MS, 3.0),
        ];

        assert_eq!(
            align(&primary, &secondary, ComparisonShift::Yesterday),
            vec![None, Some(3.0)]
        );
    }

    #[test]
    fn test_duplicate_buckets_last_write_wins() {
        let primary = vec![point(T, 1.0)];
        let secondary = vec![point(T - DAY_MS + 100, 1.0), point(T - DAY_MS + 900, 2.0)];

        assert_eq!(align(&primary, &secondary, ComparisonShift::Yesterday), vec![Some(2.0)]);
    }

    #[test]
    fn test_null_secondary_value_stays_null() {
        let primary = vec![point(T, 1.0)];
        let secondary = vec![DatasetPoint::new(T - DAY_MS, None)];

        assert_eq!(align(&primary, &secondary, ComparisonShift::Yesterday), vec![None]);
    }

    #[test]
    fn test_shift_durations_are_never_zero() {
        assert_eq!(ComparisonShift::None.duration_ms(), None);
        assert_eq!(ComparisonShift::Yesterday.duration_ms(), Some(86_400_000));
        assert_eq!(ComparisonShift::LastWeek.duration_ms(), Some(604_800_000));
        assert_eq!("last_week".parse::<ComparisonShift>().unwrap(), ComparisonShift::LastWeek);
        assert!("custom".parse::<ComparisonShift>().is_err());
    }

    #[test]
    fn test_summary() {
        let summary = summarize(&[Some(60.0), None, Some(40.0)], &[Some(40.0), Some(40.0)]);
        assert_eq!(summary.current_avg, Some(50.0));
        assert_eq!(summary.comparison_avg, Some(40.0));
        assert_eq!(summary.change_percent, Some(25.0));

        let empty = summarize(&[None], &[Some(0.0)]);
        assert_eq!(empty.current_avg, None);
        assert_eq!(empty.change_percent, None);
        assert_eq!(change_percent(Some(5.0), Some(0.0)), None);
    }
}
