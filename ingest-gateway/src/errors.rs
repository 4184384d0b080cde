use http::StatusCode;
use thiserror::Error;

use crate::writer::WriterError;

/// Errors that abandon a whole request.
///
/// Row-level failures never show up here; they are collected into the
/// batch response instead.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid uri")]
    InvalidUri,

    #[error("{0}")]
    BodyRead(String),

    #[error("{0}")]
    Connection(#[from] RegistryError),

    #[error("{0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("server task failed: {0}")]
    ServerTask(#[from] tokio::task::JoinError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidUri | GatewayError::BodyRead(_) => StatusCode::BAD_REQUEST,
            GatewayError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Connection(_)
            | GatewayError::Serialization(_)
            | GatewayError::ServerTask(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{0}")]
    Connect(#[from] WriterError),

    #[error("writer registry is shut down")]
    Closed,
}
