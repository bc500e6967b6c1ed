use chrono::{TimeZone, Utc};
use perfwatch_client::credentials::{CredentialProvider, StaticCredentials};
use perfwatch_client::history::{
    extract, ComparisonPeriod, ComparisonQuery, ComparisonShift, ComparisonView, HistoryError,
    HistoryQuery, HistorySource, HttpHistorySource, MetricField, MetricType,
};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Answer exactly one HTTP request with `status` and `body`; yields the raw request head
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
        }

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&request).into_owned()
    });

    (format!("http://{}", addr), handle)
}

fn source(base_url: &str, credentials: Arc<StaticCredentials>) -> HttpHistorySource {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    HttpHistorySource::with_client(base_url, credentials, client).unwrap()
}

fn credentials(token: &str) -> Arc<StaticCredentials> {
    Arc::new(StaticCredentials::new(Some(token.to_string())))
}

#[tokio::test]
async fn test_metrics_request_and_response() {
    let body = r#"{
        "metric_type": "disk",
        "start_time": "2025-01-18T14:00:00Z",
        "end_time": "2025-01-18T15:00:00Z",
        "interval": "1m",
        "count": 2,
        "data_points": [
            {"timestamp": "2025-01-18T14:00:00Z", "data": {"io": {"read_bytes_per_sec": 2048.0}}},
            {"timestamp": "2025-01-18T14:01:00Z", "data": {"io": {}}}
        ]
    }"#;
    let (base_url, server) = serve_once("200 OK", body).await;
    let source = source(&base_url, credentials("secret"));

    let query = HistoryQuery::new(
        MetricType::Disk,
        Utc.with_ymd_and_hms(2025, 1, 18, 14, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 1, 18, 15, 0, 0).unwrap(),
    );
    let response = source.metrics(&query).await.unwrap();

    assert_eq!(response.metric_type, MetricType::Disk);
    assert_eq!(response.count, 2);
    assert_eq!(response.interval.as_deref(), Some("1m"));
    let values: Vec<_> = extract(&response.data_points, MetricField::DiskRead)
        .into_iter()
        .map(|p| p.value)
        .collect();
    assert_eq!(values, vec![Some(2048.0), None]);

    let request = server.await.unwrap();
    let request_line = request.lines().next().unwrap();
    assert!(request_line.starts_with("GET /api/history/metrics?"), "{}", request_line);
    assert!(request_line.contains("metric_type=disk"));
    assert!(request_line.contains("limit=1000"));
    assert!(request
        .to_lowercase()
        .contains("authorization: bearer secret"));
}

#[tokio::test]
async fn test_unauthorized_clears_token() {
    let (base_url, server) = serve_once("401 Unauthorized", r#"{"detail":"expired"}"#).await;
    let creds = credentials("expired");
    let source = source(&base_url, creds.clone());

    let result = source.metric_types().await;

    assert!(matches!(result, Err(HistoryError::Unauthorized)));
    assert_eq!(creds.token(), None);
    server.await.unwrap();
}

#[tokio::test]
async fn test_server_error_keeps_body() {
    let (base_url, server) = serve_once("503 Service Unavailable", r#"{"detail":"db down"}"#).await;
    let creds = credentials("secret");
    let source = source(&base_url, creds.clone());

    match source.metric_types().await {
        Err(HistoryError::Status { status, body }) => {
            assert_eq!(status, 503);
            assert!(body.contains("db down"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(creds.token().as_deref(), Some("secret"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_metric_types_skip_unknown() {
    let (base_url, server) =
        serve_once("200 OK", r#"{"metric_types": ["cpu", "gpu", "memory_bandwidth"]}"#).await;
    let source = source(&base_url, Arc::new(StaticCredentials::default()));

    let types = source.metric_types().await.unwrap();
    assert_eq!(types, vec![MetricType::Cpu, MetricType::MemoryBandwidth]);

    // No token, no header
    let request = server.await.unwrap();
    assert!(!request.to_lowercase().contains("authorization:"));
}

#[tokio::test]
async fn test_comparison_end_to_end() {
    let body = r#"{
        "metric_type": "perf_events",
        "period": "hour",
        "compare_to": "last_week",
        "current": {
            "start_time": "2025-01-18T14:00:00Z",
            "end_time": "2025-01-18T15:00:00Z",
            "data_points": [
                {"timestamp": "2025-01-18T14:00:00.250Z", "data": {"l1d_miss_rate": 0.02}},
                {"timestamp": "2025-01-18T14:00:05Z", "data": {"l1d_miss_rate": 0.04}}
            ]
        },
        "comparison": {
            "start_time": "2025-01-11T14:00:00Z",
            "end_time": "2025-01-11T15:00:00Z",
            "data_points": [
                {"timestamp": "2025-01-11T14:00:00Z", "data": {"l1d_miss_rate": 0.01}}
            ]
        },
        "summary": {"current_avg": null, "comparison_avg": null, "change_percent": null}
    }"#;
    let (base_url, server) = serve_once("200 OK", body).await;
    let source = source(&base_url, credentials("secret"));

    let query = ComparisonQuery::relative(
        MetricType::PerfEvents,
        ComparisonPeriod::Hour,
        ComparisonShift::LastWeek,
    );
    let view = ComparisonView::from_response(source.compare(&query).await.unwrap());

    assert_eq!(view.shift(), ComparisonShift::LastWeek);
    let overlay = view.overlay(MetricField::PerfL1dMissRate);
    assert_eq!(overlay.current, vec![Some(2.0), Some(4.0)]);
    assert_eq!(overlay.comparison, vec![Some(1.0), None]);

    let summary = view.summary(MetricField::PerfL1dMissRate);
    assert_eq!(summary.current_avg, Some(3.0));
    assert_eq!(summary.comparison_avg, Some(1.0));
    assert_eq!(summary.change_percent, Some(200.0));

    let request = server.await.unwrap();
    let request_line = request.lines().next().unwrap();
    assert!(request_line.starts_with("GET /api/history/compare?"));
    assert!(request_line.contains("period=hour"));
    assert!(request_line.contains("compare_to=last_week"));
}

#[tokio::test]
async fn test_invalid_query_never_hits_the_network() {
    let source = source("http://127.0.0.1:9", credentials("secret"));
    let query = ComparisonQuery::relative(
        MetricType::Cpu,
        ComparisonPeriod::Day,
        ComparisonShift::None,
    );

    assert!(matches!(
        source.compare(&query).await,
        Err(HistoryError::InvalidQuery(_))
    ));
}
