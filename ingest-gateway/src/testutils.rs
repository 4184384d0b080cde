use crate::destination::DestinationKey;
use crate::writer::{Connector, Credentials, InsertId, Row, Writer, WriterError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Ordered record of interesting things that happened during a test.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

pub fn test_credentials() -> Credentials {
    Credentials {
        account: "gateway@test.iam.example.com".into(),
        private_key: b"not a real key".to_vec(),
    }
}

pub fn test_destination(table: &str) -> DestinationKey {
    DestinationKey::new("proj", "ds", table).unwrap()
}

/// Connector double that counts connects and hands out [`TestWriter`]s.
#[derive(Default)]
pub struct TestConnector {
    connects: AtomicUsize,
    fail: AtomicBool,
    latency: Duration,
    held_tables: HashSet<String>,
    release: Arc<Notify>,
    events: EventLog,
    writers: Mutex<Vec<Arc<TestWriter>>>,
}

impl TestConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    /// Connects for `table` block until [`TestConnector::release_held`] is called.
    pub fn holding(mut self, table: &str) -> Self {
        self.held_tables.insert(table.to_string());
        self
    }

    pub fn release_held(&self) {
        self.release.notify_one();
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn writers(&self) -> Vec<Arc<TestWriter>> {
        self.writers.lock().clone()
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(
        &self,
        destination: &DestinationKey,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn Writer>, WriterError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if self.held_tables.contains(destination.table()) {
            self.release.notified().await;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(WriterError::Connect(format!("{destination} unreachable")));
        }

        self.events.push(format!("connect {destination}"));
        let writer = Arc::new(TestWriter::new(destination.clone(), self.events.clone()));
        self.writers.lock().push(writer.clone());
        Ok(writer)
    }
}

/// Writer double that keeps every accepted row.
///
/// Rows carrying `"reject": true` are refused.
pub struct TestWriter {
    destination: DestinationKey,
    rows: Mutex<Vec<(InsertId, Row)>>,
    closed: AtomicBool,
    events: EventLog,
}

impl TestWriter {
    pub fn new(destination: DestinationKey, events: EventLog) -> Self {
        Self {
            destination,
            rows: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            events,
        }
    }

    pub fn rows(&self) -> Vec<(InsertId, Row)> {
        self.rows.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Writer for TestWriter {
    async fn add(&self, insert_id: InsertId, row: Row) -> Result<(), WriterError> {
        if self.is_closed() {
            return Err(WriterError::Closed);
        }
        if row.get("reject") == Some(&serde_json::Value::Bool(true)) {
            return Err(WriterError::Rejected("refused by test writer".into()));
        }
        self.rows.lock().push((insert_id, row));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.events.push(format!("close {}", self.destination));
    }
}
