// Historical metrics source
//
// The dashboard's REST API serves stored snapshots per metric family and
// period-over-period comparisons. `HistorySource` is the seam the rest of the
// crate talks to; `HttpHistorySource` is the reqwest implementation.

use crate::credentials::CredentialProvider;
use crate::history::align::ComparisonShift;
use crate::history::types::{
    AggregationInterval, ComparisonPeriod, ComparisonResponse, HistoryResponse, MetricType,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result type for history operations
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Errors that can occur while loading history
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server rejected the token; it has been cleared
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

pub const METRICS_PATH: &str = "/api/history/metrics";
pub const METRIC_TYPES_PATH: &str = "/api/history/metrics/types";
pub const COMPARE_PATH: &str = "/api/history/compare";

/// Default row limit, as the server's own default
pub const DEFAULT_LIMIT: u32 = 1000;

const REQUEST_TIMEOUT_SECS: u64 = 30;

type QueryParams = Vec<(&'static str, String)>;

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Stored snapshots of one family over a time range
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub metric_type: MetricType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub limit: u32,
    pub interval: Option<AggregationInterval>,
}

impl HistoryQuery {
    pub fn new(
        metric_type: MetricType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            metric_type,
            start_time,
            end_time,
            limit: DEFAULT_LIMIT,
            interval: None,
        }
    }

    pub fn with_interval(mut self, interval: AggregationInterval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    fn params(&self) -> HistoryResult<QueryParams> {
        if self.end_time < self.start_time {
            return Err(HistoryError::InvalidQuery(
                "end_time is before start_time".to_string(),
            ));
        }

        let mut params = vec![
            ("metric_type", self.metric_type.as_str().to_string()),
            ("start_time", format_time(&self.start_time)),
            ("end_time", format_time(&self.end_time)),
            ("limit", self.limit.to_string()),
        ];
        if let Some(interval) = self.interval {
            params.push(("interval", interval.as_str().to_string()));
        }
        Ok(params)
    }
}

/// What the current period is compared against
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonTarget {
    /// The last `period`, against the same span `compare_to` earlier
    Relative {
        period: ComparisonPeriod,
        compare_to: ComparisonShift,
    },

    /// Two explicit ranges; the server answers with `compare_to = "custom"`
    Custom {
        current: (DateTime<Utc>, DateTime<Utc>),
        comparison: (DateTime<Utc>, DateTime<Utc>),
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonQuery {
    pub metric_type: MetricType,
    pub target: ComparisonTarget,
    pub limit: u32,
    pub interval: Option<AggregationInterval>,
}

impl ComparisonQuery {
    pub fn relative(
        metric_type: MetricType,
        period: ComparisonPeriod,
        compare_to: ComparisonShift,
    ) -> Self {
        Self {
            metric_type,
            target: ComparisonTarget::Relative { period, compare_to },
            limit: DEFAULT_LIMIT,
            interval: None,
        }
    }

    pub fn custom(
        metric_type: MetricType,
        current: (DateTime<Utc>, DateTime<Utc>),
        comparison: (DateTime<Utc>, DateTime<Utc>),
    ) -> Self {
        Self {
            metric_type,
            target: ComparisonTarget::Custom { current, comparison },
            limit: DEFAULT_LIMIT,
            interval: None,
        }
    }

    pub fn with_interval(mut self, interval: AggregationInterval) -> Self {
        self.interval = Some(interval);
        self
    }

    fn params(&self) -> HistoryResult<QueryParams> {
        let mut params = vec![("metric_type", self.metric_type.as_str().to_string())];

        match &self.target {
            ComparisonTarget::Relative { period, compare_to } => {
                if *compare_to == ComparisonShift::None {
                    return Err(HistoryError::InvalidQuery(
                        "compare_to must be yesterday or last_week".to_string(),
                    ));
                }
                params.push(("period", period.as_str().to_string()));
                params.push(("compare_to", compare_to.as_str().to_string()));
            }
            ComparisonTarget::Custom { current, comparison } => {
                for (start, end) in [current, comparison] {
                    if end < start {
                        return Err(HistoryError::InvalidQuery(
                            "range ends before it starts".to_string(),
                        ));
                    }
                }
                if current.1 - current.0 != comparison.1 - comparison.0 {
                    return Err(HistoryError::InvalidQuery(
                        "comparison ranges must have the same duration".to_string(),
                    ));
                }
                params.push(("start_time_1", format_time(&current.0)));
                params.push(("end_time_1", format_time(&current.1)));
                params.push(("start_time_2", format_time(&comparison.0)));
                params.push(("end_time_2", format_time(&comparison.1)));
            }
        }

        params.push(("limit", self.limit.to_string()));
        if let Some(interval) = self.interval {
            params.push(("interval", interval.as_str().to_string()));
        }
        Ok(params)
    }
}

/// Source of stored metrics
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Stored snapshots of one family
    async fn metrics(&self, query: &HistoryQuery) -> HistoryResult<HistoryResponse>;

    /// Current period and prior period of one family
    async fn compare(&self, query: &ComparisonQuery) -> HistoryResult<ComparisonResponse>;

    /// Families the server keeps history for
    async fn metric_types(&self) -> HistoryResult<Vec<MetricType>>;
}

#[derive(Debug, Deserialize)]
struct MetricTypesResponse {
    #[serde(default)]
    metric_types: Vec<String>,
}

/// History API over HTTP
pub struct HttpHistorySource {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpHistorySource {
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialProvider>) -> HistoryResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Self::with_client(base_url, credentials, client)
    }

    /// Use a preconfigured reqwest client (proxies, TLS roots, timeouts)
    pub fn with_client(
        base_url: &str,
        credentials: Arc<dyn CredentialProvider>,
        client: Client,
    ) -> HistoryResult<Self> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| HistoryError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(HistoryError::InvalidUrl(format!(
                "unsupported scheme: {}",
                base_url.scheme()
            )));
        }

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&'static str, String)],
    ) -> HistoryResult<T> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| HistoryError::InvalidUrl(e.to_string()))?;
        debug!("GET {}", url);

        let mut request = self.client.get(url).query(params);
        if let Some(token) = self.credentials.token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            warn!("History API rejected the token, clearing it");
            self.credentials.clear();
            return Err(HistoryError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HistoryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl HistorySource for HttpHistorySource {
    async fn metrics(&self, query: &HistoryQuery) -> HistoryResult<HistoryResponse> {
        let params = query.params()?;
        self.get(METRICS_PATH, &params).await
    }

    async fn compare(&self, query: &ComparisonQuery) -> HistoryResult<ComparisonResponse> {
        let params = query.params()?;
        self.get(COMPARE_PATH, &params).await
    }

    async fn metric_types(&self) -> HistoryResult<Vec<MetricType>> {
        let response: MetricTypesResponse = self.get(METRIC_TYPES_PATH, &[]).await?;
        Ok(response
            .metric_types
            .iter()
            .filter_map(|name| match name.parse() {
                Ok(metric_type) => Some(metric_type),
                Err(_) => {
                    debug!("Skipping unknown metric type {}", name);
                    None
                }
            })
            .collect())
    }
}
