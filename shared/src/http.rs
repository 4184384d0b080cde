use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioExecutor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

pub type ResponseBody = BoxBody<Bytes, Infallible>;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

// Delay after a failed accept, doubled on each consecutive failure up to the max
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Source of incoming connections for [`run_http_service`].
pub trait Accept: Send + Sync + 'static {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Accepts connections on `listener` and serves each one on its own task until
/// `shutdown` is cancelled.
///
/// Accept errors (running out of file descriptors, a connection reset before it
/// was accepted) are logged and retried after a backoff; they never stop the loop.
/// The listener is dropped (and the socket closed) before this function returns,
/// so once the returned future resolves no new connection can be admitted.
/// Connections that were already accepted keep running on their tasks.
pub async fn run_http_service<L, S>(listener: L, service: S, shutdown: CancellationToken)
where
    L: Accept,
    S: Service<Request<Incoming>, Response = Response<ResponseBody>> + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let service_arc = Arc::new(service);
    let mut backoff: Option<Duration> = None;

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer_addr) = match accepted {
            Ok(accepted) => {
                backoff = None;
                accepted
            }
            Err(e) => {
                let delay = backoff.map_or(ACCEPT_BACKOFF_MIN, |d| (d * 2).min(ACCEPT_BACKOFF_MAX));
                backoff = Some(delay);
                tracing::warn!(error = %e, retry_in = ?delay, "accept failed");

                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        let _ = stream.set_nodelay(true);
        let io = TokioIo::new(stream);
        let svc = service_arc.clone();

        // Hand the connection to hyper; auto-detect h1/h2 on this socket
        tokio::spawn(async move {
            if let Err(e) = Builder::new(TokioExecutor::new())
                .serve_connection(io, svc)
                .await
            {
                tracing::debug!(%peer_addr, error = %e, "connection closed with error");
            }
        });
    }

    drop(listener);
    tracing::info!("listener closed");
}

pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into()).boxed()
}

/// Serializes `value` as the JSON body of a response with the given status.
pub fn make_json_response<T: Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<Response<ResponseBody>, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    let mut response = Response::new(full_body(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    Ok(response)
}

/// Builds a `{"error": "<message>"}` response.
pub fn make_error_response(status: StatusCode, message: &str) -> Response<ResponseBody> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct HelloService;

    impl Service<Request<Incoming>> for HelloService {
        type Response = Response<ResponseBody>;
        type Error = Infallible;
        type Future =
            Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

        fn call(&self, _req: Request<Incoming>) -> Self::Future {
            Box::pin(async move { Ok(make_error_response(StatusCode::IM_A_TEAPOT, "hello")) })
        }
    }

    #[tokio::test]
    async fn test_serves_until_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let server = tokio::spawn(run_http_service(listener, HelloService, shutdown.clone()));

        let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert_eq!(response.status().as_u16(), 418);
        assert_eq!(
            response.headers()["content-type"],
            "application/json; charset=utf-8"
        );
        assert_eq!(response.text().await.unwrap(), r#"{"error":"hello"}"#);

        shutdown.cancel();
        server.await.unwrap();

        // The socket is gone once the accept loop returns
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    /// Fails the first `failures` accepts with EMFILE, then accepts normally.
    struct ExhaustedListener {
        inner: TcpListener,
        failures: AtomicUsize,
        attempts: Arc<AtomicUsize>,
    }

    impl Accept for ExhaustedListener {
        fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            async move {
                if fail {
                    return Err(io::Error::from_raw_os_error(24));
                }
                self.inner.accept().await
            }
        }
    }

    #[tokio::test]
    async fn test_accept_errors_do_not_stop_serving() {
        let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = inner.local_addr().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let listener = ExhaustedListener {
            inner,
            failures: AtomicUsize::new(4),
            attempts: attempts.clone(),
        };
        let shutdown = CancellationToken::new();

        let server = tokio::spawn(run_http_service(listener, HelloService, shutdown.clone()));

        let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert_eq!(response.status().as_u16(), 418);
        assert!(attempts.load(Ordering::SeqCst) >= 5);
        assert!(!server.is_finished());

        shutdown.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_during_accept_backoff() {
        let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = ExhaustedListener {
            inner,
            failures: AtomicUsize::new(usize::MAX),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        let shutdown = CancellationToken::new();

        let server = tokio::spawn(run_http_service(listener, HelloService, shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!server.is_finished());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .expect("accept loop kept retrying after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_response_escapes_message() {
        let response = make_error_response(StatusCode::BAD_REQUEST, "bad \"quote\"");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "bad \"quote\"");
    }
}
