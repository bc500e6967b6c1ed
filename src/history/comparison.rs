// Loaded period comparison, ready for charting

use crate::history::align::{align, summarize, ComparisonShift};
use crate::history::field::{extract, MetricField};
use crate::history::types::{
    ComparisonResponse, ComparisonSummary, HistoryPoint, MetricType, RawTimestamp,
};
use serde::Serialize;

/// Chart-ready overlay: the current series and the prior series aligned to it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Overlay {
    pub timestamps: Vec<RawTimestamp>,
    pub current: Vec<Option<f64>>,
    pub comparison: Vec<Option<f64>>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Current and prior period of one metric family
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonView {
    metric_type: MetricType,
    shift: ComparisonShift,
    current: Vec<HistoryPoint>,
    comparison: Vec<HistoryPoint>,
    server_summary: ComparisonSummary,
}

impl ComparisonView {
    /// Build from a compare response. A `compare_to` that is not a fixed shift
    /// (e.g. `custom` ranges) yields an empty comparison overlay.
    pub fn from_response(resp: ComparisonResponse) -> Self {
        let shift = resp.compare_to.parse().unwrap_or_else(|_| {
            tracing::debug!("No fixed shift for compare_to={}", resp.compare_to);
            ComparisonShift::None
        });
        Self {
            metric_type: resp.metric_type,
            shift,
            current: resp.current.data_points,
            comparison: resp.comparison.data_points,
            server_summary: resp.summary,
        }
    }

    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    pub fn shift(&self) -> ComparisonShift {
        self.shift
    }

    pub fn has_data(&self) -> bool {
        !self.current.is_empty()
    }

    pub fn has_comparison(&self) -> bool {
        !self.comparison.is_empty()
    }

    /// Overlay of `field`; empty when the field belongs to another family
    pub fn overlay(&self, field: MetricField) -> Overlay {
        if field.metric_type() != self.metric_type {
            return Overlay::default();
        }

        let primary = extract(&self.current, field);
        let secondary = extract(&self.comparison, field);
        let comparison = align(&primary, &secondary, self.shift);

        Overlay {
            timestamps: primary.iter().map(|p| p.timestamp.clone()).collect(),
            current: primary.into_iter().map(|p| p.value).collect(),
            comparison,
        }
    }

    /// Server summary, with missing figures computed from `field`'s overlay
    pub fn summary(&self, field: MetricField) -> ComparisonSummary {
        let server = self.server_summary;
        if server.current_avg.is_some() && server.comparison_avg.is_some() {
            return server;
        }

        let overlay = self.overlay(field);
        let local = summarize(&overlay.current, &overlay.comparison);
        let current_avg = server.current_avg.or(local.current_avg);
        let comparison_avg = server.comparison_avg.or(local.comparison_avg);
        ComparisonSummary {
            current_avg,
            comparison_avg,
            change_percent: server
                .change_percent
                .or_else(|| crate::history::align::change_percent(current_avg, comparison_avg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compare_response(compare_to: &str) -> ComparisonResponse {
        serde_json::from_value(json!({
            "metric_type": "cpu",
            "period": "hour",
            "compare_to": compare_to,
            "current": {"data_points": [
                {"timestamp": "2025-01-18T14:30:00Z", "data": {"usage_percent": 30.0}},
                {"timestamp": "2025-01-18T14:30:05Z", "data": {"usage_percent": 50.0}},
                {"timestamp": "2025-01-18T14:30:10Z", "data": {}}
            ]},
            "comparison": {"data_points": [
                {"timestamp": "2025-01-17T14:30:00.400Z", "data": {"usage_percent": 20.0}},
                {"timestamp": "2025-01-17T14:30:05Z", "data": {"usage_percent": 20.0}}
            ]}
        }))
        .unwrap()
    }

    #[test]
    fn test_overlay_aligns_yesterday() {
        let view = ComparisonView::from_response(compare_response("yesterday"));
        let overlay = view.overlay(MetricField::CpuUsage);

        assert_eq!(overlay.timestamps.len(), 3);
        assert_eq!(overlay.current, vec![Some(30.0), Some(50.0), None]);
        assert_eq!(overlay.comparison, vec![Some(20.0), Some(20.0), None]);
    }

    #[test]
    fn test_overlay_for_other_family_is_empty() {
        let view = ComparisonView::from_response(compare_response("yesterday"));
        assert!(view.overlay(MetricField::DiskRead).is_empty());
    }

    #[test]
    fn test_custom_range_has_no_overlay() {
        let view = ComparisonView::from_response(compare_response("custom"));
        let overlay = view.overlay(MetricField::CpuUsage);

        assert_eq!(view.shift(), ComparisonShift::None);
        assert_eq!(overlay.current.len(), 3);
        assert!(overlay.comparison.is_empty());
    }

    #[test]
    fn test_missing_prior_period() {
        let mut resp = compare_response("yesterday");
        resp.comparison.data_points.clear();
        let view = ComparisonView::from_response(resp);

        assert!(view.has_data());
        assert!(!view.has_comparison());
        assert!(view.overlay(MetricField::CpuUsage).comparison.is_empty());
    }

    #[test]
    fn test_summary_falls_back_to_local() {
        let view = ComparisonView::from_response(compare_response("yesterday"));
        let summary = view.summary(MetricField::CpuUsage);

        assert_eq!(summary.current_avg, Some(40.0));
        assert_eq!(summary.comparison_avg, Some(20.0));
        assert_eq!(summary.change_percent, Some(100.0));
    }

    #[test]
    fn test_server_summary_wins() {
        let mut resp = compare_response("yesterday");
        resp.summary = ComparisonSummary {
            current_avg: Some(1.0),
            comparison_avg: Some(2.0),
            change_percent: Some(-50.0),
        };
        let view = ComparisonView::from_response(resp);
        assert_eq!(view.summary(MetricField::CpuUsage).change_percent, Some(-50.0));
    }
}
