mod config;
mod listener;
mod telemetry;

use bigquery_writer::{BigQueryConnector, BigQueryError};
use clap::Parser;
use config::{Cli, Settings};
use ingest_gateway::GatewayConfig;
use ingest_gateway::errors::GatewayError;
use ingest_gateway::shutdown::termination_signal;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
enum InserterError {
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error("could not install signal handlers: {0}")]
    Signal(std::io::Error),
    #[error("could not open listener: {0}")]
    Listen(std::io::Error),
    #[error("could not set up BigQuery client: {0}")]
    BigQuery(#[from] BigQueryError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = cli.logging.clone();

    let settings = cli.into_settings();
    let sentry_dsn = settings
        .as_ref()
        .ok()
        .and_then(|s| s.config.logging.as_ref())
        .map(|logging| logging.sentry_dsn.clone());

    let _sentry_guard = match telemetry::init_logging(&level, sentry_dsn.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(metrics) = &settings.config.metrics
        && let Err(e) = telemetry::init_metrics(metrics)
    {
        tracing::error!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("inserter failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(settings: Settings) -> Result<(), InserterError> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(InserterError::Runtime)?;
    rt.block_on(run_async(settings))
}

async fn run_async(settings: Settings) -> Result<(), InserterError> {
    let signal = termination_signal().map_err(InserterError::Signal)?;
    let listener = listener::acquire(&settings.listen)
        .await
        .map_err(InserterError::Listen)?;
    let connector = BigQueryConnector::new(settings.config.bigquery.clone())?;

    tracing::info!(account = %settings.credentials.account, "inserter starting");

    ingest_gateway::run(
        listener,
        GatewayConfig {
            request_timeout: settings.config.request_timeout(),
        },
        Arc::new(connector),
        Arc::new(settings.credentials),
        signal,
    )
    .await?;

    tracing::info!("inserter stopped");
    Ok(())
}
