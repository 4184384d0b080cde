pub mod destination;
pub mod errors;
pub mod metrics_defs;
pub mod processor;
pub mod registry;
pub mod service;
pub mod shutdown;
pub mod writer;

#[cfg(test)]
mod testutils;

use errors::GatewayError;
use registry::WriterRegistry;
use service::GatewayService;
use shared::http::run_http_service;
use shutdown::ShutdownCoordinator;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use writer::{Connector, Credentials};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Serves the gateway on `listener` until `signal` resolves, then shuts down in order.
///
/// Returns only after every writer has been released. If the accept loop task
/// fails on its own, writers are still released before the error is returned.
pub async fn run<S>(
    listener: TcpListener,
    config: GatewayConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<Credentials>,
    signal: S,
) -> Result<(), GatewayError>
where
    S: Future<Output = ()>,
{
    let registry = Arc::new(WriterRegistry::new(connector, credentials));
    let coordinator = ShutdownCoordinator::new(registry.clone());
    let service = GatewayService::new(registry, config.request_timeout);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "gateway listening");
    }

    let mut server = tokio::spawn(run_http_service(
        listener,
        service,
        coordinator.listener_token(),
    ));

    let server_exited = tokio::select! {
        _ = signal => None,
        result = &mut server => Some(result),
    };

    match server_exited {
        None => {
            coordinator
                .shutdown(async {
                    if let Err(e) = server.await {
                        tracing::error!("server task failed: {}", e);
                    }
                })
                .await;
            Ok(())
        }
        Some(result) => {
            // The accept loop only ends early by panicking; the listener is gone with it
            coordinator.shutdown(async {}).await;
            Ok(result?)
        }
    }
}
