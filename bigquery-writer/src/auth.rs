//! Service account authentication using the OAuth2 JWT bearer grant.

use crate::errors::BigQueryError;
use crate::metrics_defs::TOKEN_REFRESHES;
use ingest_gateway::writer::Credentials;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use shared::counter;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use url::Url;

pub const INSERT_DATA_SCOPE: &str = "https://www.googleapis.com/auth/bigquery.insertdata";

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);
// Tokens are replaced this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct AccessToken {
    token: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }
}

/// Hands out access tokens for one service account, fetching a new one when
/// the current token is close to expiry.
pub struct TokenSource {
    client: reqwest::Client,
    token_url: Url,
    account: String,
    key: EncodingKey,
    current: Mutex<Option<AccessToken>>,
}

impl TokenSource {
    pub fn new(
        client: reqwest::Client,
        token_url: Url,
        credentials: &Credentials,
    ) -> Result<Self, BigQueryError> {
        let key =
            EncodingKey::from_rsa_pem(&credentials.private_key).map_err(BigQueryError::InvalidKey)?;

        Ok(TokenSource {
            client,
            token_url,
            account: credentials.account.clone(),
            key,
            current: Mutex::new(None),
        })
    }

    pub async fn token(&self) -> Result<String, BigQueryError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref()
            && token.is_fresh()
        {
            return Ok(token.token.clone());
        }

        let fetched = self.fetch().await?;
        let token = fetched.token.clone();
        *current = Some(fetched);
        Ok(token)
    }

    async fn fetch(&self) -> Result<AccessToken, BigQueryError> {
        let assertion = self.sign_assertion()?;
        let requested_at = Instant::now();

        let response = self
            .client
            .post(self.token_url.clone())
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BigQueryError::TokenRejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = response.json().await?;
        counter!(TOKEN_REFRESHES).increment(1);
        tracing::debug!(account = %self.account, expires_in = body.expires_in, "fetched access token");

        Ok(AccessToken {
            token: body.access_token,
            expires_at: requested_at + Duration::from_secs(body.expires_in),
        })
    }

    fn sign_assertion(&self) -> Result<String, BigQueryError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let claims = Claims {
            iss: self.account.clone(),
            scope: INSERT_DATA_SCOPE.to_string(),
            aud: self.token_url.to_string(),
            iat: now,
            exp: now + ASSERTION_LIFETIME.as_secs(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(BigQueryError::Signing)
    }
}
