use serde::Serialize;
use tracing::warn;

use super::adjust::ScoreAdjuster;
use super::query::{QueryBuilder, StructuredQuery};
use crate::backend::{ALL_HITS, BackendId, SearchBackend};
use crate::error::SearchError;

/// Stands in for a document stored without an identifier.
pub const MISSING_IDENTIFIER: &str = "No path for this document";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateResult {
    pub backend_id: BackendId,
    pub identifier: Option<String>,
    pub title: Option<String>,
    pub base_score: f64,
    pub adjusted_score: f64,
    /// 1-based position after re-sorting by adjusted score.
    pub rank: usize,
    /// 1-based position in the backend's base ranking.
    pub base_rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCandidate {
    pub backend_id: BackendId,
    pub identifier: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResults {
    pub query: StructuredQuery,
    pub desired_count: usize,
    pub total_hits: usize,
    pub candidates: Vec<CandidateResult>,
    pub skipped: Vec<SkippedCandidate>,
}

impl RankedResults {
    pub fn shortfall(&self) -> usize {
        self.desired_count.saturating_sub(self.candidates.len())
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.candidates
            .iter()
            .map(|candidate| {
                candidate
                    .identifier
                    .clone()
                    .unwrap_or_else(|| MISSING_IDENTIFIER.to_string())
            })
            .collect::<Vec<String>>()
    }
}

pub struct RankedResultSource<B> {
    backend: B,
    builder: QueryBuilder,
    adjuster: ScoreAdjuster,
    oversample: Option<usize>,
}

impl<B: SearchBackend> RankedResultSource<B> {
    pub fn new(backend: B, builder: QueryBuilder, adjuster: ScoreAdjuster) -> Self {
        Self {
            backend,
            builder,
            adjuster,
            oversample: None,
        }
    }

    /// Caps re-ranking at `factor` times the requested count. Without a cap every
    /// matching document is re-ranked before truncation.
    pub fn with_oversample(mut self, factor: Option<usize>) -> Self {
        self.oversample = factor.map(|factor| factor.max(1));
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn adjuster(&self) -> &ScoreAdjuster {
        &self.adjuster
    }

    pub fn build_query(&self, query_text: &str) -> Result<StructuredQuery, SearchError> {
        self.builder.build(query_text)
    }

    pub fn search(
        &self,
        query_text: &str,
        desired_count: usize,
    ) -> Result<RankedResults, SearchError> {
        let query = self.builder.build(query_text)?;
        self.search_query(query, desired_count)
    }

    pub fn search_query(
        &self,
        query: StructuredQuery,
        desired_count: usize,
    ) -> Result<RankedResults, SearchError> {
        let request_count = match self.oversample {
            Some(factor) => desired_count.saturating_mul(factor),
            None => ALL_HITS,
        };
        let backend_hits = self.backend.search(&query, request_count)?;

        let mut candidates = Vec::with_capacity(backend_hits.hits.len());
        let mut skipped = Vec::new();

        for (index, hit) in backend_hits.hits.iter().enumerate() {
            let metadata = self.backend.metadata(hit.backend_id)?;
            let identifier_text = metadata.identifier.clone().unwrap_or_default();

            let adjusted = match metadata.content_length {
                Some(content_length) => {
                    self.adjuster
                        .adjust(hit.base_score, &identifier_text, content_length)
                }
                None => Err(SearchError::invalid_metadata(
                    identifier_text.clone(),
                    "content length is missing",
                )),
            };

            match adjusted {
                Ok(adjusted_score) => candidates.push(CandidateResult {
                    backend_id: hit.backend_id,
                    identifier: metadata.identifier,
                    title: metadata.title,
                    base_score: hit.base_score,
                    adjusted_score,
                    rank: 0,
                    base_rank: index + 1,
                }),
                Err(error @ SearchError::InvalidMetadata { .. }) => {
                    warn!(
                        backend_id = hit.backend_id,
                        identifier = %identifier_text,
                        error = %error,
                        "excluding candidate with invalid metadata"
                    );
                    skipped.push(SkippedCandidate {
                        backend_id: hit.backend_id,
                        identifier: metadata.identifier,
                        reason: error.to_string(),
                    });
                }
                Err(error) => return Err(error),
            }
        }

        sort_by_adjusted_score(&mut candidates);
        candidates.truncate(desired_count);
        for (index, candidate) in candidates.iter_mut().enumerate() {
            candidate.rank = index + 1;
        }

        Ok(RankedResults {
            query,
            desired_count,
            total_hits: backend_hits.total_hits,
            candidates,
            skipped,
        })
    }
}

/// Stable: equal adjusted scores keep their base-ranking order.
fn sort_by_adjusted_score(candidates: &mut [CandidateResult]) {
    candidates.sort_by(|left, right| right.adjusted_score.total_cmp(&left.adjusted_score));
}
