//! Ordered process shutdown.
//!
//! On the first termination signal the listener is closed so no new connection
//! is admitted, then every cached writer is released, then the coordinator
//! reports [`ShutdownState::Stopped`]. Requests already admitted keep running
//! on their connection tasks while this happens.

use crate::registry::WriterRegistry;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

pub struct ShutdownCoordinator {
    registry: Arc<WriterRegistry>,
    listener_shutdown: CancellationToken,
    state: watch::Sender<ShutdownState>,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<WriterRegistry>) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            registry,
            listener_shutdown: CancellationToken::new(),
            state,
        }
    }

    /// Token the accept loop watches; cancelled when draining begins.
    pub fn listener_token(&self) -> CancellationToken {
        self.listener_shutdown.clone()
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Runs the shutdown sequence once. Later calls return `false` without doing anything.
    ///
    /// `listener_closed` must resolve only after the listener socket is closed;
    /// writers are not touched before that.
    pub async fn shutdown<F>(&self, listener_closed: F) -> bool
    where
        F: Future,
    {
        let started = self.state.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Draining;
                true
            } else {
                false
            }
        });
        if !started {
            tracing::debug!("shutdown already in progress");
            return false;
        }

        tracing::info!("closing listener");
        self.listener_shutdown.cancel();
        listener_closed.await;

        self.registry.release_all().await;

        self.state.send_replace(ShutdownState::Stopped);
        tracing::info!("shutdown complete");
        true
    }

    /// Resolves once the shutdown sequence has finished.
    pub async fn stopped(&self) {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = state.wait_for(|s| *s == ShutdownState::Stopped).await;
    }
}

/// Waits for `SIGTERM` or `SIGINT`.
///
/// Handlers are installed when this is called, so call it before serving. The
/// returned future resolves on the first signal; later signals are ignored.
#[cfg(unix)]
pub fn termination_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = term.recv() => tracing::info!("received SIGTERM"),
            _ = int.recv() => tracing::info!("received SIGINT"),
        }
    })
}

/// Waits for `ctrl+c`.
#[cfg(not(unix))]
pub fn termination_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl+c: {}", e);
            return std::future::pending().await;
        }
        tracing::info!("received SIGINT");
    })
}
