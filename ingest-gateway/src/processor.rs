use crate::metrics_defs::{ROWS_ACCEPTED, ROWS_FAILED};
use crate::registry::WriterHandle;
use crate::writer::{InsertId, Row};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use shared::counter;
use std::fmt::Display;

/// Length of generated insert identifiers.
pub const INSERT_ID_LEN: usize = 10;

/// A line that could not be decoded or was refused by the writer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    pub index: usize,
    pub error: String,
}

impl RowError {
    fn new(index: usize, error: impl Display) -> Self {
        Self {
            index,
            error: error.to_string(),
        }
    }
}

/// Failed rows of one request in ascending line order. Empty means every row was accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResponse {
    pub errors: Vec<RowError>,
}

/// Decodes newline-delimited JSON and forwards each object to a writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestionProcessor;

impl IngestionProcessor {
    pub fn new() -> Self {
        IngestionProcessor
    }

    /// Forwards every line of `body` to `handle`, never stopping at a bad row.
    pub async fn process(&self, handle: &WriterHandle, body: &[u8]) -> BatchResponse {
        let mut response = BatchResponse::default();
        let mut accepted = 0u64;

        for (index, line) in split_rows(body).into_iter().enumerate() {
            let row: Row = match serde_json::from_slice(line) {
                Ok(row) => row,
                Err(e) => {
                    counter!(ROWS_FAILED, "reason" => "decode").increment(1);
                    response.errors.push(RowError::new(index, e));
                    continue;
                }
            };

            if let Err(e) = handle.add(generate_insert_id(), row).await {
                counter!(ROWS_FAILED, "reason" => "submit").increment(1);
                response.errors.push(RowError::new(index, e));
                continue;
            }
            accepted += 1;
        }

        counter!(ROWS_ACCEPTED).increment(accepted);
        tracing::debug!(
            destination = %handle.destination(),
            accepted,
            failed = response.errors.len(),
            "batch processed"
        );
        response
    }
}

/// Splits a body into rows on `\n`.
///
/// The empty segment after a terminating newline is not a row, so `"a\nb\n"` and
/// `"a\nb"` both hold two rows and an empty body holds none. Empty lines anywhere
/// else are rows (and fail to decode). A trailing `\r` is dropped from each line.
fn split_rows(body: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = body
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect();

    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// Returns a random alphanumeric dedup hint for the sink.
///
/// Best effort only: ids are not guaranteed unique, just unlikely to repeat
/// within the window the sink deduplicates over. Uses the thread-local RNG, so
/// concurrent callers never share generator state.
pub fn generate_insert_id() -> InsertId {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INSERT_ID_LEN)
        .map(char::from)
        .collect()
}
