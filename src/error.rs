use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("invalid metadata for {identifier}: {reason}")]
    InvalidMetadata { identifier: String, reason: String },

    #[error("backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("no such page: {page}")]
    NoSuchPage { page: usize },

    #[error("oracle data missing for query '{query}' ({}): {reason}", path.display())]
    OracleDataMissing {
        query: String,
        path: PathBuf,
        reason: String,
    },
}

impl SearchError {
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    pub fn invalid_metadata(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }
}
