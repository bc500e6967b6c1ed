use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use perfwatch_client::config::{self, ClientConfig};
use perfwatch_client::history::{
    extract, fields_for, AggregationInterval, ComparisonPeriod, ComparisonQuery, ComparisonShift,
    ComparisonView, HistoryQuery, HistorySource, HttpHistorySource, MetricField, MetricType,
};
use perfwatch_client::streaming::{
    Channel, ConnectionState, Sample, SessionError, SessionEvent, StreamController,
    StreamControllerConfig, WebSocketConnector,
};
use std::env;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// PerfWatch client - live metrics stream and period comparison
#[derive(Parser)]
#[command(name = "perfwatch-live")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Dashboard origin, e.g. https://perf.example.com
    #[arg(long, global = true, env = "PERFWATCH_URL")]
    url: Option<String>,

    /// Login token
    #[arg(long, global = true, env = "PERFWATCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail the live metrics stream (default)
    Live,

    /// Print stored history of one metric family
    History {
        /// Metric family
        #[arg(short, long, default_value = "cpu")]
        metric: MetricType,

        /// How far back to look, in minutes
        #[arg(long, default_value = "60")]
        minutes: i64,

        /// Aggregation interval: 5s, 1m, 5m, 1h, auto
        #[arg(short, long)]
        interval: Option<AggregationInterval>,

        /// Only this field (default: every field of the family)
        #[arg(short, long)]
        field: Option<MetricField>,
    },

    /// Compare the current period with a prior one
    Compare {
        /// Metric family
        #[arg(short, long, default_value = "cpu")]
        metric: MetricType,

        /// Current period: hour, day, week
        #[arg(short, long, default_value = "hour")]
        period: ComparisonPeriod,

        /// Prior period: yesterday, last_week
        #[arg(short, long, default_value = "yesterday")]
        compare_to: ComparisonShift,

        /// Aggregation interval: 5s, 1m, 5m, 1h, auto
        #[arg(short, long)]
        interval: Option<AggregationInterval>,

        /// Only this field (default: every field of the family)
        #[arg(short, long)]
        field: Option<MetricField>,
    },

    /// List metric families with stored history
    Types,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env must be loaded before clap reads the environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perfwatch_client=info,perfwatch_live=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Live) {
        Commands::Live => run_live(&config).await,
        Commands::History {
            metric,
            minutes,
            interval,
            field,
        } => run_history(&config, metric, minutes, interval, field).await,
        Commands::Compare {
            metric,
            period,
            compare_to,
            interval,
            field,
        } => run_compare(&config, metric, period, compare_to, interval, field).await,
        Commands::Types => run_types(&config).await,
    }
}

/// Environment configuration with the command-line flags applied on top
fn load_config(cli: &Cli) -> Result<ClientConfig> {
    ClientConfig::from_lookup(|key| match key {
        config::URL_VAR => cli.url.clone(),
        config::TOKEN_VAR => cli.token.clone(),
        _ => env::var(key).ok(),
    })
    .context("Invalid configuration")
}

async fn run_live(config: &ClientConfig) -> Result<()> {
    let controller = StreamController::new(
        StreamControllerConfig::new(config.session_config()),
        config.credentials(),
        Arc::new(WebSocketConnector::new()),
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    controller.set_event_callback(move |event| {
        let _ = event_tx.send(event);
    });

    info!("Streaming live metrics from {}", config.url);
    controller.connect()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break Ok(());
            }
            Some(event) = event_rx.recv() => match event {
                SessionEvent::StateChanged { state, .. } => {
                    info!("Stream {}", state);
                }
                SessionEvent::SampleAppended { .. } => {
                    if let Some(sample) = controller.latest_sample() {
                        println!("{}", format_sample(&sample));
                    }
                }
                SessionEvent::Error { error, .. } => {
                    warn!("{}", error);
                    let fatal = matches!(
                        error,
                        SessionError::AuthMissing | SessionError::TransportConstruction(_)
                    );
                    if fatal && controller.state() == ConnectionState::Disconnected {
                        break Err(error);
                    }
                }
            },
        }
    };

    controller.shutdown().await;
    let metrics = controller.buffer_metrics();
    info!(
        "Received {} samples ({} kept)",
        metrics.total_appended, metrics.current_size
    );

    if let Err(error) = outcome {
        bail!("Stream stopped: {}", error);
    }
    Ok(())
}

async fn run_history(
    config: &ClientConfig,
    metric: MetricType,
    minutes: i64,
    interval: Option<AggregationInterval>,
    field: Option<MetricField>,
) -> Result<()> {
    let fields = selected_fields(metric, field)?;
    let source = HttpHistorySource::new(&config.url, config.credentials())?;

    let end = Utc::now();
    let mut query = HistoryQuery::new(metric, lookback(end, minutes)?, end);
    if let Some(interval) = interval {
        query = query.with_interval(interval);
    }
    let response = source.metrics(&query).await?;
    info!(
        "{} points of {} (interval {})",
        response.data_points.len(),
        response.metric_type,
        response.interval.as_deref().unwrap_or("raw")
    );

    for field in fields {
        println!("# {}", field);
        for point in extract(&response.data_points, field) {
            println!("{}\t{}", timestamp_label(&point.timestamp), format_value(point.value));
        }
    }
    Ok(())
}

async fn run_compare(
    config: &ClientConfig,
    metric: MetricType,
    period: ComparisonPeriod,
    compare_to: ComparisonShift,
    interval: Option<AggregationInterval>,
    field: Option<MetricField>,
) -> Result<()> {
    let fields = selected_fields(metric, field)?;
    let source = HttpHistorySource::new(&config.url, config.credentials())?;

    let mut query = ComparisonQuery::relative(metric, period, compare_to);
    if let Some(interval) = interval {
        query = query.with_interval(interval);
    }
    let view = ComparisonView::from_response(source.compare(&query).await?);

    if !view.has_data() {
        println!("No data for the last {} of {}", period, metric);
        return Ok(());
    }
    if !view.has_comparison() {
        warn!("No {} data for the {} period, overlay will be empty", metric, view.shift());
    }

    for field in fields {
        let overlay = view.overlay(field);
        let summary = view.summary(field);

        println!("# {} ({} vs {})", field, period, view.shift());
        for (i, timestamp) in overlay.timestamps.iter().enumerate() {
            println!(
                "{}\t{}\t{}",
                timestamp_label(timestamp),
                format_value(overlay.current[i]),
                format_value(overlay.comparison.get(i).copied().flatten())
            );
        }
        println!(
            "avg {} vs {} ({})",
            format_value(summary.current_avg),
            format_value(summary.comparison_avg),
            summary
                .change_percent
                .map(|p| format!("{:+.1}%", p))
                .unwrap_or_else(|| "n/a".to_string())
        );
    }
    Ok(())
}

async fn run_types(config: &ClientConfig) -> Result<()> {
    let source = HttpHistorySource::new(&config.url, config.credentials())?;
    info!("Metric families stored at {}", source.base_url());
    for metric_type in source.metric_types().await? {
        println!("{}", metric_type);
    }
    Ok(())
}

/// Start of a window reaching `minutes` back from `end` (at least one minute)
fn lookback(end: DateTime<Utc>, minutes: i64) -> Result<DateTime<Utc>> {
    let Some(span) = ChronoDuration::try_minutes(minutes.max(1)) else {
        bail!("--minutes {} is out of range", minutes);
    };
    match end.checked_sub_signed(span) {
        Some(start) => Ok(start),
        None => bail!("--minutes {} reaches before the earliest timestamp", minutes),
    }
}

fn selected_fields(metric: MetricType, field: Option<MetricField>) -> Result<Vec<MetricField>> {
    match field {
        Some(field) if field.metric_type() != metric => {
            bail!("{} is not a field of {}", field, metric)
        }
        Some(field) => Ok(vec![field]),
        None => Ok(fields_for(metric)),
    }
}

fn format_sample(sample: &Sample) -> String {
    let mut line = sample.timestamp.format("%H:%M:%S").to_string();
    for channel in Channel::ALL {
        if let Some(value) = sample.channels.get(channel) {
            line.push_str(&format!(" {}={:.2}", channel, value));
        }
    }
    line
}

fn format_value(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "-".to_string())
}

fn timestamp_label(timestamp: &perfwatch_client::history::RawTimestamp) -> String {
    match timestamp.to_datetime() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("{:?}", timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_lookback_window() {
        let end = Utc.with_ymd_and_hms(2025, 1, 18, 15, 0, 0).unwrap();
        assert_eq!(
            lookback(end, 30).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 18, 14, 30, 0).unwrap()
        );
        // Zero and negative spans still look back one minute
        assert_eq!(
            lookback(end, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 18, 14, 59, 0).unwrap()
        );
    }

    #[test]
    fn test_lookback_out_of_range_is_an_error() {
        let end = Utc.with_ymd_and_hms(2025, 1, 18, 15, 0, 0).unwrap();
        assert!(lookback(end, i64::MAX).is_err());
        // Representable span, but the start would precede DateTime::MIN_UTC
        assert!(lookback(end, 200_000_000_000).is_err());
    }

    #[test]
    fn test_field_must_belong_to_metric() {
        assert!(selected_fields(MetricType::Cpu, Some(MetricField::DiskRead)).is_err());
        assert_eq!(
            selected_fields(MetricType::Disk, Some(MetricField::DiskRead)).unwrap(),
            vec![MetricField::DiskRead]
        );
    }
}
