// Historical metrics and period comparison
//
// - `types`: Wire types of the history API and timestamp parsing
// - `source`: HistorySource seam and the reqwest client
// - `field`: Chartable fields of each metric family
// - `align`: Aligns a prior period onto the current one
// - `comparison`: Chart-ready overlays of a loaded comparison

pub mod align;
pub mod comparison;
pub mod field;
pub mod source;
pub mod types;

pub use align::{align, normalize, summarize, ComparisonShift};
pub use comparison::{ComparisonView, Overlay};
pub use field::{extract, fields_for, MetricField};
pub use source::{
    ComparisonQuery, ComparisonTarget, HistoryError, HistoryQuery, HistoryResult, HistorySource,
    HttpHistorySource,
};
pub use types::{
    AggregationInterval, ComparisonPeriod, ComparisonResponse, ComparisonSummary, DatasetPoint,
    HistoryPoint, HistoryResponse, MetricType, RawTimestamp,
};
