//! BigQuery streaming inserts behind the gateway's writer capability.

pub mod auth;
pub mod config;
mod errors;
pub mod metrics_defs;
mod writer;

#[cfg(test)]
mod testutils;

pub use config::BigQueryConfig;
pub use errors::BigQueryError;
pub use writer::{BigQueryConnector, BigQueryWriter};
