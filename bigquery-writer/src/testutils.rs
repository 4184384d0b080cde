use crate::auth::Claims;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use ingest_gateway::writer::Credentials;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::net::TcpListener;
use url::Url;

const TEST_PRIVATE_KEY: &[u8] = include_bytes!("../testdata/test_key.pem");
const TEST_PUBLIC_KEY: &[u8] = include_bytes!("../testdata/test_key.pub.pem");

pub fn test_credentials() -> Credentials {
    Credentials {
        account: "writer@test-project.iam.gserviceaccount.com".into(),
        private_key: TEST_PRIVATE_KEY.to_vec(),
    }
}

#[derive(Default)]
struct FakeState {
    token_requests: AtomicUsize,
    reject_tokens: AtomicBool,
    token_lifetime: AtomicU64,
    assertions: Mutex<Vec<String>>,
    inserts: Mutex<Vec<(String, serde_json::Value)>>,
    authorizations: Mutex<Vec<String>>,
}

/// Local stand-in for the OAuth token endpoint and the insertAll API.
pub struct FakeBigQuery {
    addr: SocketAddr,
    state: Arc<FakeState>,
}

impl FakeBigQuery {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to address");
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(FakeState::default());
        state.token_lifetime.store(3600, Ordering::SeqCst);

        let server_state = state.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let state = server_state.clone();

                tokio::spawn(async move {
                    let svc = service_fn(move |req| handle(state.clone(), req));
                    if let Err(err) =
                        hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                    {
                        eprintln!("Error serving connection: {:?}", err);
                    }
                });
            }
        });

        FakeBigQuery { addr, state }
    }

    pub fn token_url(&self) -> Url {
        Url::parse(&format!("http://{}/token", self.addr)).unwrap()
    }

    pub fn api_base_url(&self) -> Url {
        Url::parse(&format!("http://{}/bigquery/v2/", self.addr)).unwrap()
    }

    pub fn reject_tokens(&self) {
        self.state.reject_tokens.store(true, Ordering::SeqCst);
    }

    pub fn set_token_lifetime(&self, secs: u64) {
        self.state.token_lifetime.store(secs, Ordering::SeqCst);
    }

    pub fn token_requests(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }

    /// Verifies the most recent assertion against the test public key.
    pub fn last_assertion_claims(&self) -> Option<Claims> {
        let assertion = self.state.assertions.lock().last()?.clone();
        let key = DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.token_url().to_string()]);
        jsonwebtoken::decode::<Claims>(&assertion, &key, &validation)
            .ok()
            .map(|data| data.claims)
    }

    /// Path and body of every insertAll request, in arrival order.
    pub fn insert_requests(&self) -> Vec<(String, serde_json::Value)> {
        self.state.inserts.lock().clone()
    }

    pub fn authorizations(&self) -> Vec<String> {
        self.state.authorizations.lock().clone()
    }
}

async fn handle(
    state: Arc<FakeState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_else(|_| Bytes::new());

    if parts.uri.path() == "/token" {
        state.token_requests.fetch_add(1, Ordering::SeqCst);
        if state.reject_tokens.load(Ordering::SeqCst) {
            return Ok(json_response(
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": "invalid_grant" }),
            ));
        }

        let form = String::from_utf8_lossy(&body);
        if let Some(assertion) = form
            .split('&')
            .find_map(|pair| pair.strip_prefix("assertion="))
        {
            state.assertions.lock().push(assertion.to_string());
        }

        return Ok(json_response(
            StatusCode::OK,
            serde_json::json!({
                "access_token": "test-token",
                "expires_in": state.token_lifetime.load(Ordering::SeqCst),
                "token_type": "Bearer",
            }),
        ));
    }

    if parts.uri.path().ends_with("/insertAll") {
        if let Some(auth) = parts
            .headers
            .get(hyper::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
        {
            state.authorizations.lock().push(auth.to_string());
        }
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
        state
            .inserts
            .lock()
            .push((parts.uri.path().to_string(), parsed));

        return Ok(json_response(
            StatusCode::OK,
            serde_json::json!({ "kind": "bigquery#tableDataInsertAllResponse" }),
        ));
    }

    Ok(json_response(
        StatusCode::NOT_FOUND,
        serde_json::json!({ "error": "not found" }),
    ))
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}
