use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::destination::DestinationKey;

/// One decoded input line. No schema is enforced.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Opaque token attached to each submitted row so the sink can drop duplicates.
pub type InsertId = String;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriterError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("writer is closed")]
    Closed,

    #[error("row rejected: {0}")]
    Rejected(String),
}

/// Account used to authenticate against the streaming-insert backend.
#[derive(Clone)]
pub struct Credentials {
    pub account: String,
    pub private_key: Vec<u8>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A live channel to a single destination.
///
/// `add` may be called concurrently by any number of requests; implementations
/// serialize or buffer internally as needed.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn add(&self, insert_id: InsertId, row: Row) -> Result<(), WriterError>;

    /// Flushes anything buffered and releases the connection.
    async fn close(&self);
}

/// Establishes new writers. Called at most once per destination at a time.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        destination: &DestinationKey,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Writer>, WriterError>;
}
