use serde::Serialize;

use crate::error::SearchError;
use crate::ranking::query::StructuredQuery;

mod fts;
#[cfg(test)]
pub mod memory;
mod schema;

pub use fts::FtsBackend;
pub use schema::{
    DB_SCHEMA_VERSION, DocumentRecord, IndexMode, UpsertOutcome, configure_connection,
    count_documents, ensure_schema, prepare_index, read_metadata_value, rebuild_fts_index,
    upsert_document,
};

pub type BackendId = i64;

/// `max_results` that asks for every matching document.
pub const ALL_HITS: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BackendHit {
    pub backend_id: BackendId,
    pub base_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendHits {
    pub total_hits: usize,
    pub hits: Vec<BackendHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMetadata {
    pub identifier: Option<String>,
    pub title: Option<String>,
    pub content_length: Option<u64>,
}

/// Narrow query surface of the full-text engine. Implementations never mutate the index.
pub trait SearchBackend {
    /// Base-ranked hits, best first; `total_hits` counts every matching document.
    fn search(&self, query: &StructuredQuery, max_results: usize)
    -> Result<BackendHits, SearchError>;

    fn metadata(&self, backend_id: BackendId) -> Result<DocumentMetadata, SearchError>;

    fn explain(&self, query: &StructuredQuery, backend_id: BackendId)
    -> Result<String, SearchError>;
}

impl<T: SearchBackend + ?Sized> SearchBackend for &T {
    fn search(
        &self,
        query: &StructuredQuery,
        max_results: usize,
    ) -> Result<BackendHits, SearchError> {
        (**self).search(query, max_results)
    }

    fn metadata(&self, backend_id: BackendId) -> Result<DocumentMetadata, SearchError> {
        (**self).metadata(backend_id)
    }

    fn explain(
        &self,
        query: &StructuredQuery,
        backend_id: BackendId,
    ) -> Result<String, SearchError> {
        (**self).explain(query, backend_id)
    }
}
