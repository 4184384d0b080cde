use bigquery_writer::BigQueryConfig;
use bigquery_writer::config::ValidationError;
use clap::Parser;
use ingest_gateway::writer::Credentials;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Streams newline-delimited JSON request bodies into BigQuery tables.
#[derive(Parser, Debug)]
#[command(name = "inserter", version)]
pub struct Cli {
    /// Inherited file descriptor of a listening socket
    #[arg(long)]
    pub fd: Option<i32>,

    /// TCP port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Service account email
    #[arg(long)]
    pub email: Option<String>,

    /// Service account private key in PEM format
    #[arg(long)]
    pub pem: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    pub logging: String,

    /// Optional YAML file with metrics, sentry and BigQuery settings
    #[arg(long)]
    pub config_file_path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenSource {
    Fd(i32),
    Port(u16),
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub request_timeout_secs: u64,
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
    pub bigquery: BigQueryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            request_timeout_secs: ingest_gateway::DEFAULT_REQUEST_TIMEOUT.as_secs(),
            metrics: None,
            logging: None,
            bigquery: BigQueryConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidRequestTimeout);
        }
        self.bigquery.validate()?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Everything the process needs to start serving.
#[derive(Debug)]
pub struct Settings {
    pub listen: ListenSource,
    pub credentials: Credentials,
    pub config: Config,
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let config = match &self.config_file_path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.validate()?;

        let account = self
            .email
            .filter(|email| !email.is_empty())
            .ok_or(ConfigError::MissingAccount)?;
        let pem = self.pem.ok_or(ConfigError::MissingPem)?;

        let listen = match (self.fd, self.port) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingListener),
            (Some(fd), None) if fd <= 0 => return Err(ConfigError::InvalidFd(fd)),
            (Some(fd), None) => ListenSource::Fd(fd),
            (None, Some(0)) => return Err(ConfigError::InvalidPort),
            (None, Some(port)) => ListenSource::Port(port),
            (None, None) => return Err(ConfigError::NoListener),
        };

        let private_key = std::fs::read(&pem).map_err(|source| ConfigError::PemRead {
            path: pem.clone(),
            source,
        })?;

        Ok(Settings {
            listen,
            credentials: Credentials {
                account,
                private_key,
            },
            config,
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid bigquery config: {0}")]
    BigQuery(#[from] ValidationError),
    #[error("request_timeout_secs cannot be 0")]
    InvalidRequestTimeout,
    #[error("account required")]
    MissingAccount,
    #[error("pem required")]
    MissingPem,
    #[error("could not read pem file {path}: {source}")]
    PemRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("fd or port required")]
    NoListener,
    #[error("fd and port cannot both be set")]
    ConflictingListener,
    #[error("port cannot be 0")]
    InvalidPort,
    #[error("fd must be a positive file descriptor, got {0}")]
    InvalidFd(i32),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("invalid sentry dsn: {0}")]
    InvalidSentryDsn(String),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
}
