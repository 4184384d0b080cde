use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("max_batch_rows must be between 1 and 500")]
    InvalidBatchSize,

    #[error("flush_interval_ms cannot be 0")]
    InvalidFlushInterval,

    #[error("queue_size cannot be 0")]
    InvalidQueueSize,

    #[error("http_timeout_secs cannot be 0")]
    InvalidHttpTimeout,

    #[error("api_base_url cannot be used as a base: {0}")]
    InvalidBaseUrl(Url),
}

/// Upper bound on rows per `insertAll` call recommended by BigQuery.
pub const MAX_INSERT_ALL_ROWS: usize = 500;

/// Streaming-insert settings, shared by every destination.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BigQueryConfig {
    /// OAuth2 endpoint the signed service account assertion is exchanged at
    pub token_url: Url,
    /// Base of the BigQuery REST API, ending in `/bigquery/v2/`
    pub api_base_url: Url,
    /// Rows buffered per destination before an early flush
    pub max_batch_rows: usize,
    /// Longest a buffered row waits before being flushed
    pub flush_interval_ms: u64,
    /// Rows that may be queued per destination before `add` waits
    pub queue_size: usize,
    pub http_timeout_secs: u64,
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        BigQueryConfig {
            token_url: Url::parse("https://oauth2.googleapis.com/token")
                .expect("static url is valid"),
            api_base_url: Url::parse("https://bigquery.googleapis.com/bigquery/v2/")
                .expect("static url is valid"),
            max_batch_rows: MAX_INSERT_ALL_ROWS,
            flush_interval_ms: 1000,
            queue_size: 10_000,
            http_timeout_secs: 30,
        }
    }
}

impl BigQueryConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_batch_rows == 0 || self.max_batch_rows > MAX_INSERT_ALL_ROWS {
            return Err(ValidationError::InvalidBatchSize);
        }
        if self.flush_interval_ms == 0 {
            return Err(ValidationError::InvalidFlushInterval);
        }
        if self.queue_size == 0 {
            return Err(ValidationError::InvalidQueueSize);
        }
        if self.http_timeout_secs == 0 {
            return Err(ValidationError::InvalidHttpTimeout);
        }
        if self.api_base_url.cannot_be_a_base() {
            return Err(ValidationError::InvalidBaseUrl(self.api_base_url.clone()));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
