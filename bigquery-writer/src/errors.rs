use thiserror::Error;

#[derive(Error, Debug)]
pub enum BigQueryError {
    #[error("invalid private key: {0}")]
    InvalidKey(jsonwebtoken::errors::Error),

    #[error("could not sign token assertion: {0}")]
    Signing(jsonwebtoken::errors::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token request rejected ({status}): {body}")]
    TokenRejected { status: u16, body: String },

    #[error("insertAll rejected ({status}): {body}")]
    InsertRejected { status: u16, body: String },

    #[error("cannot build insertAll url from {0}")]
    InvalidUrl(url::Url),
}
