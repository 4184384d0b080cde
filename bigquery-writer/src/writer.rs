use crate::auth::TokenSource;
use crate::config::BigQueryConfig;
use crate::errors::BigQueryError;
use crate::metrics_defs::{INSERT_ALL_DURATION, ROWS_DROPPED, ROWS_INSERTED};
use async_trait::async_trait;
use ingest_gateway::destination::DestinationKey;
use ingest_gateway::writer::{Connector, Credentials, InsertId, Row, Writer, WriterError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared::{counter, histogram};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;
use url::Url;

/// Creates a [`BigQueryWriter`] per destination.
pub struct BigQueryConnector {
    client: reqwest::Client,
    config: Arc<BigQueryConfig>,
}

impl BigQueryConnector {
    pub fn new(config: BigQueryConfig) -> Result<Self, BigQueryError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;

        Ok(BigQueryConnector {
            client,
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl Connector for BigQueryConnector {
    async fn connect(
        &self,
        destination: &DestinationKey,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Writer>, WriterError> {
        let writer =
            BigQueryWriter::connect(self.client.clone(), &self.config, destination, credentials)
                .await
                .map_err(|e| WriterError::Connect(e.to_string()))?;
        Ok(Arc::new(writer))
    }
}

#[derive(Serialize)]
struct InsertRow {
    #[serde(rename = "insertId")]
    insert_id: InsertId,
    json: Row,
}

#[derive(Serialize)]
struct InsertAllRequest<'a> {
    kind: &'static str,
    rows: &'a [InsertRow],
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrors>,
}

#[derive(Deserialize, Debug)]
struct InsertErrors {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize, Debug)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

/// Streams rows into one BigQuery table.
///
/// `add` only queues the row; a background task batches queued rows into
/// `tabledata.insertAll` calls. Rows BigQuery refuses after they were queued are
/// logged and counted, not reported back to the caller.
pub struct BigQueryWriter {
    destination: DestinationKey,
    queue: Mutex<Option<mpsc::Sender<InsertRow>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl BigQueryWriter {
    /// Authenticates for `destination` and starts its flush task.
    ///
    /// An access token is fetched before returning, so bad credentials fail here
    /// rather than on the first flush.
    pub async fn connect(
        client: reqwest::Client,
        config: &BigQueryConfig,
        destination: &DestinationKey,
        credentials: &Credentials,
    ) -> Result<Self, BigQueryError> {
        let tokens = TokenSource::new(client.clone(), config.token_url.clone(), credentials)?;
        tokens.token().await?;

        let flusher = Flusher {
            client,
            tokens,
            insert_url: insert_all_url(&config.api_base_url, destination)?,
            max_batch_rows: config.max_batch_rows,
            flush_interval: config.flush_interval(),
        };

        let (tx, rx) = mpsc::channel(config.queue_size);
        let handle = tokio::spawn(flusher.run(rx).in_current_span());

        Ok(BigQueryWriter {
            destination: destination.clone(),
            queue: Mutex::new(Some(tx)),
            flusher: Mutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl Writer for BigQueryWriter {
    async fn add(&self, insert_id: InsertId, row: Row) -> Result<(), WriterError> {
        let queue = self.queue.lock().clone().ok_or(WriterError::Closed)?;
        queue
            .send(InsertRow {
                insert_id,
                json: row,
            })
            .await
            .map_err(|_| WriterError::Closed)
    }

    async fn close(&self) {
        drop(self.queue.lock().take());

        let flusher = self.flusher.lock().take();
        if let Some(flusher) = flusher
            && let Err(e) = flusher.await
        {
            tracing::error!(destination = %self.destination, "flush task failed: {}", e);
        }
    }
}

fn insert_all_url(base: &Url, destination: &DestinationKey) -> Result<Url, BigQueryError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| BigQueryError::InvalidUrl(base.clone()))?
        .pop_if_empty()
        .extend([
            "projects",
            destination.project(),
            "datasets",
            destination.dataset(),
            "tables",
            destination.table(),
            "insertAll",
        ]);
    Ok(url)
}

struct Flusher {
    client: reqwest::Client,
    tokens: TokenSource,
    insert_url: Url,
    max_batch_rows: usize,
    flush_interval: Duration,
}

impl Flusher {
    /// Runs until every sender is dropped, then flushes what is left.
    async fn run(self, mut rx: mpsc::Receiver<InsertRow>) {
        let mut batch = Vec::with_capacity(self.max_batch_rows);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(row) => {
                        batch.push(row);
                        if batch.len() >= self.max_batch_rows {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch).await;
        }
        tracing::debug!("flush task stopped");
    }

    async fn flush(&self, batch: &mut Vec<InsertRow>) {
        let started = Instant::now();
        let count = batch.len() as u64;

        let outcome = match self.insert_all(batch).await {
            Ok(rejected) => {
                counter!(ROWS_INSERTED).increment(count.saturating_sub(rejected));
                counter!(ROWS_DROPPED).increment(rejected);
                "ok"
            }
            Err(e) => {
                counter!(ROWS_DROPPED).increment(count);
                tracing::warn!(rows = count, error = %e, "insertAll failed, rows dropped");
                "error"
            }
        };

        histogram!(INSERT_ALL_DURATION, "outcome" => outcome)
            .record(started.elapsed().as_secs_f64());
        batch.clear();
    }

    /// Sends one batch. Returns how many rows BigQuery rejected.
    async fn insert_all(&self, rows: &[InsertRow]) -> Result<u64, BigQueryError> {
        let token = self.tokens.token().await?;

        let response = self
            .client
            .post(self.insert_url.clone())
            .bearer_auth(token)
            .json(&InsertAllRequest {
                kind: "bigquery#tableDataInsertAllRequest",
                rows,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BigQueryError::InsertRejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: InsertAllResponse = response.json().await?;
        for insert_error in &body.insert_errors {
            let insert_id = rows
                .get(insert_error.index)
                .map(|row| row.insert_id.as_str())
                .unwrap_or_default();
            for error in &insert_error.errors {
                tracing::warn!(
                    insert_id,
                    reason = error.reason.as_deref().unwrap_or_default(),
                    message = error.message.as_deref().unwrap_or_default(),
                    "row rejected by BigQuery"
                );
            }
        }

        Ok(rejected_rows(&body.insert_errors, rows.len()))
    }
}

/// Distinct rows of a batch of `batch_len` named in `insertErrors`.
fn rejected_rows(insert_errors: &[InsertErrors], batch_len: usize) -> u64 {
    insert_errors
        .iter()
        .map(|e| e.index)
        .filter(|index| *index < batch_len)
        .collect::<HashSet<_>>()
        .len() as u64
}
