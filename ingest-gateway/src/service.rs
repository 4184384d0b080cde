use crate::destination::DestinationKey;
use crate::errors::GatewayError;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_TIMED_OUT};
use crate::processor::IngestionProcessor;
use crate::registry::WriterRegistry;
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use shared::http::{ResponseBody, make_error_response, make_json_response};
use shared::{counter, histogram};
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    writers: usize,
}

struct GatewayInner {
    registry: Arc<WriterRegistry>,
    processor: IngestionProcessor,
    request_timeout: Duration,
}

/// HTTP entry point: `/{project}/{dataset}/{table}` with an NDJSON body.
#[derive(Clone)]
pub struct GatewayService {
    inner: Arc<GatewayInner>,
}

impl GatewayService {
    pub fn new(registry: Arc<WriterRegistry>, request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                registry,
                processor: IngestionProcessor::new(),
                request_timeout,
            }),
        }
    }

    /// Handles one request within the request timeout.
    ///
    /// Per-row failures still produce a 200; only a bad path, an unreadable body, a
    /// failed writer connection or the timeout change the status.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body,
        B::Error: Display,
    {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_owned();

        let result = match tokio::time::timeout(self.inner.request_timeout, self.dispatch(req)).await
        {
            Ok(result) => result,
            Err(_) => {
                counter!(REQUESTS_TIMED_OUT).increment(1);
                Err(GatewayError::Timeout)
            }
        };

        let response = match result {
            Ok(response) => {
                tracing::debug!(%method, %path, "request handled");
                response
            }
            Err(e) => {
                tracing::info!(%method, %path, error = %e, "request failed");
                make_error_response(e.status(), &e.to_string())
            }
        };

        histogram!(REQUEST_DURATION, "status" => response.status().as_str().to_owned())
            .record(started.elapsed().as_secs_f64());
        response
    }

    async fn dispatch<B>(&self, req: Request<B>) -> Result<Response<ResponseBody>, GatewayError>
    where
        B: Body,
        B::Error: Display,
    {
        if req.uri().path() == "/" {
            return self.serve_status();
        }

        let destination = DestinationKey::from_path(req.uri().path())?;

        let body = req
            .into_body()
            .collect()
            .await
            .map_err(|e| GatewayError::BodyRead(e.to_string()))?
            .to_bytes();

        let handle = self.inner.registry.resolve(&destination).await?;
        let batch = self.inner.processor.process(&handle, &body).await;

        Ok(make_json_response(StatusCode::OK, &batch)?)
    }

    fn serve_status(&self) -> Result<Response<ResponseBody>, GatewayError> {
        let status = StatusResponse {
            status: "ok",
            writers: self.inner.registry.len(),
        };
        Ok(make_json_response(StatusCode::OK, &status)?)
    }
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<ResponseBody>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}
