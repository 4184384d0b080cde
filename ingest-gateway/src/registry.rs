use crate::destination::DestinationKey;
use crate::errors::RegistryError;
use crate::metrics_defs::{WRITER_CONNECT_FAILURES, WRITER_CONNECTS, WRITERS_LIVE};
use crate::writer::{Connector, Credentials, InsertId, Row, Writer, WriterError};
use parking_lot::RwLock;
use shared::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::Instrument;

/// A connected writer for one destination, shared by every request targeting it.
pub struct WriterHandle {
    destination: DestinationKey,
    writer: Arc<dyn Writer>,
    span: tracing::Span,
}

impl WriterHandle {
    pub fn new(destination: DestinationKey, writer: Arc<dyn Writer>) -> Self {
        let span = tracing::info_span!(
            "writer",
            project = destination.project(),
            dataset = destination.dataset(),
            table = destination.table(),
        );
        Self {
            destination,
            writer,
            span,
        }
    }

    pub fn destination(&self) -> &DestinationKey {
        &self.destination
    }

    pub async fn add(&self, insert_id: InsertId, row: Row) -> Result<(), WriterError> {
        self.writer
            .add(insert_id, row)
            .instrument(self.span.clone())
            .await
    }

    async fn close(&self) {
        self.writer.close().instrument(self.span.clone()).await
    }
}

// A slot is inserted before its writer connects. Concurrent resolvers of the same
// destination wait on the slot instead of the map, so only one connect runs per key.
type Slot = Arc<OnceCell<Arc<WriterHandle>>>;

/// Cache of live writers keyed by destination.
pub struct WriterRegistry {
    connector: Arc<dyn Connector>,
    credentials: Arc<Credentials>,
    writers: RwLock<HashMap<DestinationKey, Slot>>,
    closed: AtomicBool,
}

impl WriterRegistry {
    pub fn new(connector: Arc<dyn Connector>, credentials: Arc<Credentials>) -> Self {
        Self {
            connector,
            credentials,
            writers: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the cached writer for `destination`, connecting one on first use.
    ///
    /// A failed connect leaves nothing behind, so the next call starts over.
    pub async fn resolve(
        &self,
        destination: &DestinationKey,
    ) -> Result<Arc<WriterHandle>, RegistryError> {
        let slot = self.slot(destination)?;
        match slot.get_or_try_init(|| self.connect(destination)).await {
            Ok(handle) => Ok(handle.clone()),
            Err(e) => {
                self.forget_failed(destination, &slot);
                Err(e)
            }
        }
    }

    /// Number of destinations with a connected writer.
    pub fn len(&self) -> usize {
        self.writers
            .read()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every cached writer. No writer can be created afterwards.
    ///
    /// Connects still in flight are waited for and their writers closed too.
    pub async fn release_all(&self) {
        let writers = {
            let mut writers = self.writers.write();
            self.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *writers)
        };

        tracing::info!(count = writers.len(), "releasing writers");

        let mut join_set = JoinSet::new();
        for (destination, slot) in writers {
            join_set.spawn(async move {
                match slot
                    .get_or_try_init(|| async { Err(RegistryError::Closed) })
                    .await
                {
                    Ok(handle) => {
                        handle.close().await;
                        tracing::debug!(%destination, "writer closed");
                    }
                    Err(_) => tracing::debug!(%destination, "no writer to close"),
                }
            });
        }

        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                tracing::error!("writer close task panicked: {}", e);
            }
        }

        gauge!(WRITERS_LIVE).set(0.0);
    }

    fn slot(&self, destination: &DestinationKey) -> Result<Slot, RegistryError> {
        if let Some(slot) = self.writers.read().get(destination) {
            return Ok(slot.clone());
        }

        let mut writers = self.writers.write();
        // Checked under the write lock so release_all sees every slot ever handed out
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::Closed);
        }
        Ok(writers.entry(destination.clone()).or_default().clone())
    }

    // Drops an empty slot after a failed connect so failing destinations do not pile
    // up in the map. Clones are only taken under the lock, so a strong count of two
    // (map and caller) means no other resolver is waiting on it.
    fn forget_failed(&self, destination: &DestinationKey, slot: &Slot) {
        let mut writers = self.writers.write();
        if let Some(current) = writers.get(destination)
            && Arc::ptr_eq(current, slot)
            && !slot.initialized()
            && Arc::strong_count(slot) == 2
        {
            writers.remove(destination);
        }
    }

    async fn connect(&self, destination: &DestinationKey) -> Result<Arc<WriterHandle>, RegistryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::Closed);
        }

        tracing::debug!(%destination, "connecting writer");
        match self.connector.connect(destination, &self.credentials).await {
            Ok(writer) => {
                counter!(WRITER_CONNECTS).increment(1);
                gauge!(WRITERS_LIVE).increment(1.0);
                tracing::info!(%destination, "writer connected");
                Ok(Arc::new(WriterHandle::new(destination.clone(), writer)))
            }
            Err(e) => {
                counter!(WRITER_CONNECT_FAILURES).increment(1);
                tracing::info!(%destination, error = %e, "writer connect failed");
                Err(e.into())
            }
        }
    }
}
