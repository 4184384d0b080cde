use percent_encoding::percent_decode_str;
use std::fmt;

use crate::errors::GatewayError;

/// Identifies a streaming-insert sink by project, dataset and table.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DestinationKey {
    project: String,
    dataset: String,
    table: String,
}

impl DestinationKey {
    /// Returns `None` if any of the parts is empty.
    pub fn new<P, D, T>(project: P, dataset: D, table: T) -> Option<Self>
    where
        P: Into<String>,
        D: Into<String>,
        T: Into<String>,
    {
        let key = DestinationKey {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        };

        if key.project.is_empty() || key.dataset.is_empty() || key.table.is_empty() {
            return None;
        }
        Some(key)
    }

    /// Parses a request path of the form `/{project}/{dataset}/{table}`.
    ///
    /// The path is percent-decoded before it is split, so an encoded `/` counts as
    /// a separator. Paths that do not decode to UTF-8 are rejected.
    pub fn from_path(path: &str) -> Result<Self, GatewayError> {
        let path = percent_decode_str(path)
            .decode_utf8()
            .map_err(|_| GatewayError::InvalidUri)?;
        let segments: Vec<&str> = path.split('/').collect();
        match segments.as_slice() {
            ["", project, dataset, table] => {
                DestinationKey::new(*project, *dataset, *table).ok_or(GatewayError::InvalidUri)
            }
            _ => Err(GatewayError::InvalidUri),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}
