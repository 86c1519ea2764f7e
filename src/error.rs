//! Typed failures raised by the pipeline core.
//!
//! Orchestration code works in [`anyhow::Result`]; these variants exist so
//! callers (and tests) can tell a malformed artifact apart from an outage.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed artifact {path}: {reason}")]
    MalformedArtifact { path: String, reason: String },

    #[error("invalid game id in url '{url}'")]
    InvalidGameId { url: String },

    #[error("invalid artifact path '{0}': expected player/<handle>/games/<YYYY>/<MM>")]
    InvalidArtifactPath(String),

    #[error("invalid period '{0}': expected YYYY/MM")]
    InvalidPeriod(String),

    #[error("invalid identifier '{0}': only ASCII letters, digits and '_' are allowed")]
    InvalidIdentifier(String),

    #[error("unknown table {0}")]
    UnknownTable(String),

    #[error("unknown column '{column}' in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("invalid run settings: {0}")]
    Settings(String),
}

impl Error {
    pub(crate) fn malformed(path: &str, reason: impl Into<String>) -> Self {
        Self::MalformedArtifact {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
