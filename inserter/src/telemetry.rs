use crate::config::{ConfigError, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_all;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "inserter";

/// Installs the global tracing subscriber.
///
/// `level` sets the default verbosity; `RUST_LOG` directives still apply on top.
/// When a sentry DSN is given, events are also reported to sentry and the
/// returned guard must be kept alive for the life of the process.
pub fn init_logging(
    level: &str,
    sentry_dsn: Option<&str>,
) -> Result<Option<sentry::ClientInitGuard>, ConfigError> {
    let level: LevelFilter = level
        .parse()
        .map_err(|_| ConfigError::InvalidLogLevel(level.to_string()))?;

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let guard = match sentry_dsn {
        Some(dsn) => {
            let dsn: sentry::types::Dsn = dsn
                .parse()
                .map_err(|e| ConfigError::InvalidSentryDsn(format!("{e}")))?;
            Some(sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                ..Default::default()
            }))
        }
        None => None,
    };
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    Ok(guard)
}

/// Sends every metric to statsd.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), ConfigError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| ConfigError::Metrics(e.to_string()))?;

    metrics::set_global_recorder(recorder)
        .map_err(|_| ConfigError::Metrics("a metrics recorder is already installed".into()))?;

    describe_all(ingest_gateway::metrics_defs::ALL_METRICS);
    describe_all(bigquery_writer::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "sending metrics to statsd"
    );
    Ok(())
}
