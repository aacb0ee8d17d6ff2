use std::cell::RefCell;
use std::collections::HashMap;

use super::{BackendHit, BackendHits, BackendId, DocumentMetadata, SearchBackend};
use crate::error::SearchError;
use crate::ranking::query::StructuredQuery;

/// Backend with canned base rankings keyed by the raw query text.
#[derive(Default)]
pub struct MemoryBackend {
    rankings: HashMap<String, Vec<BackendHit>>,
    documents: HashMap<BackendId, DocumentMetadata>,
    requested_counts: RefCell<Vec<usize>>,
}

impl MemoryBackend {
    pub fn with_document(
        mut self,
        backend_id: BackendId,
        identifier: &str,
        title: Option<&str>,
        content_length: Option<u64>,
    ) -> Self {
        self.documents.insert(
            backend_id,
            DocumentMetadata {
                identifier: Some(identifier.to_string()),
                title: title.map(ToOwned::to_owned),
                content_length,
            },
        );
        self
    }

    pub fn with_ranking(mut self, query_text: &str, hits: &[(BackendId, f64)]) -> Self {
        self.rankings.insert(
            query_text.to_string(),
            hits.iter()
                .map(|(backend_id, base_score)| BackendHit {
                    backend_id: *backend_id,
                    base_score: *base_score,
                })
                .collect::<Vec<BackendHit>>(),
        );
        self
    }

    /// `count` long documents `http://doc/{id}` with strictly decreasing base scores.
    pub fn with_uniform_corpus(mut self, query_text: &str, count: usize) -> Self {
        let mut hits = Vec::with_capacity(count);
        for index in 0..count {
            let backend_id = index as BackendId;
            self = self.with_document(
                backend_id,
                &format!("http://doc/{index}"),
                Some(&format!("Document {index}")),
                Some(10_000),
            );
            hits.push((backend_id, (count - index) as f64));
        }
        self.with_ranking(query_text, &hits)
    }

    pub fn search_calls(&self) -> usize {
        self.requested_counts.borrow().len()
    }

    pub fn requested_counts(&self) -> Vec<usize> {
        self.requested_counts.borrow().clone()
    }
}

impl SearchBackend for MemoryBackend {
    fn search(
        &self,
        query: &StructuredQuery,
        max_results: usize,
    ) -> Result<BackendHits, SearchError> {
        self.requested_counts.borrow_mut().push(max_results);

        let ranking = self.rankings.get(&query.raw).cloned().unwrap_or_default();
        let total_hits = ranking.len();
        let hits = ranking.into_iter().take(max_results).collect::<Vec<BackendHit>>();
        Ok(BackendHits { total_hits, hits })
    }

    fn metadata(&self, backend_id: BackendId) -> Result<DocumentMetadata, SearchError> {
        self.documents
            .get(&backend_id)
            .cloned()
            .ok_or(SearchError::Backend(rusqlite::Error::QueryReturnedNoRows))
    }

    fn explain(
        &self,
        query: &StructuredQuery,
        backend_id: BackendId,
    ) -> Result<String, SearchError> {
        Ok(format!("canned score for {backend_id} on [{query}]"))
    }
}
