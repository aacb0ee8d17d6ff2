use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::debug;

use super::{BackendHit, BackendHits, BackendId, DocumentMetadata, SearchBackend};
use crate::error::SearchError;
use crate::ranking::query::{ClauseKind, Field, QueryClause, StructuredQuery};

const CONTENT_CLAUSE_SQL: &str = "
    SELECT rowid, -bm25(documents_fts, 1.0, 0.0)
    FROM documents_fts
    WHERE documents_fts MATCH ?1
";

const TITLE_CLAUSE_SQL: &str = "
    SELECT rowid, -bm25(documents_fts, 0.0, 1.0)
    FROM documents_fts
    WHERE documents_fts MATCH ?1
";

/// SQLite FTS5 index over the `documents` table.
pub struct FtsBackend {
    connection: Connection,
}

impl FtsBackend {
    pub fn open_read_only(db_path: &Path) -> Result<Self, SearchError> {
        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { connection })
    }

    #[cfg(test)]
    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    fn clause_scores(&self, clause: &QueryClause) -> Result<Vec<(BackendId, f64)>, SearchError> {
        let Some(expression) = clause_expression(clause) else {
            debug!(clause = %clause, "skipping clause without searchable tokens");
            return Ok(Vec::new());
        };

        let sql = match clause.field {
            Field::Content => CONTENT_CLAUSE_SQL,
            Field::Title => TITLE_CLAUSE_SQL,
        };
        let mut statement = self.connection.prepare_cached(sql)?;
        let mut rows = statement.query([expression])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let backend_id: BackendId = row.get(0)?;
            let raw_score: f64 = row.get(1)?;
            out.push((backend_id, raw_score));
        }
        Ok(out)
    }

    fn clause_score_for(
        &self,
        clause: &QueryClause,
        backend_id: BackendId,
    ) -> Result<Option<f64>, SearchError> {
        let Some(expression) = clause_expression(clause) else {
            return Ok(None);
        };

        let sql = match clause.field {
            Field::Content => format!("{CONTENT_CLAUSE_SQL} AND rowid = ?2"),
            Field::Title => format!("{TITLE_CLAUSE_SQL} AND rowid = ?2"),
        };
        let score = self
            .connection
            .query_row(&sql, params![expression, backend_id], |row| {
                row.get::<_, f64>(1)
            })
            .optional()?;
        Ok(score)
    }
}

impl SearchBackend for FtsBackend {
    fn search(
        &self,
        query: &StructuredQuery,
        max_results: usize,
    ) -> Result<BackendHits, SearchError> {
        let mut combined = HashMap::<BackendId, f64>::new();
        for clause in &query.clauses {
            for (backend_id, raw_score) in self.clause_scores(clause)? {
                *combined.entry(backend_id).or_insert(0.0) += raw_score * clause.weight;
            }
        }

        let mut hits = combined
            .into_iter()
            .map(|(backend_id, base_score)| BackendHit {
                backend_id,
                base_score,
            })
            .collect::<Vec<BackendHit>>();
        hits.sort_by(|left, right| {
            right
                .base_score
                .total_cmp(&left.base_score)
                .then(left.backend_id.cmp(&right.backend_id))
        });

        let total_hits = hits.len();
        hits.truncate(max_results);

        Ok(BackendHits { total_hits, hits })
    }

    fn metadata(&self, backend_id: BackendId) -> Result<DocumentMetadata, SearchError> {
        let mut statement = self.connection.prepare_cached(
            "SELECT identifier, title, content_length FROM documents WHERE doc_id = ?1",
        )?;
        let metadata = statement.query_row([backend_id], |row| {
            let identifier: Option<String> = row.get(0)?;
            let title: Option<String> = row.get(1)?;
            let content_length: Option<i64> = row.get(2)?;
            Ok(DocumentMetadata {
                identifier: identifier.filter(|value| !value.is_empty()),
                title: title.filter(|value| !value.trim().is_empty()),
                content_length: content_length.and_then(|value| u64::try_from(value).ok()),
            })
        })?;
        Ok(metadata)
    }

    fn explain(
        &self,
        query: &StructuredQuery,
        backend_id: BackendId,
    ) -> Result<String, SearchError> {
        let mut lines = Vec::<String>::new();
        let mut total = 0.0;

        for clause in &query.clauses {
            match self.clause_score_for(clause, backend_id)? {
                Some(raw_score) => {
                    let contribution = raw_score * clause.weight;
                    total += contribution;
                    lines.push(format!(
                        "  {contribution:.6} = {:.1} x bm25 {raw_score:.6} [{clause}]",
                        clause.weight
                    ));
                }
                None => lines.push(format!("  0.000000 no match [{clause}]")),
            }
        }

        let mut out = format!("{total:.6} = sum of:");
        for line in lines {
            out.push('\n');
            out.push_str(&line);
        }
        Ok(out)
    }
}

fn clause_expression(clause: &QueryClause) -> Option<String> {
    let column = clause.field.column();
    match &clause.kind {
        ClauseKind::Phrase(tokens) => {
            let tokens = searchable_tokens(tokens.iter().map(String::as_str));
            if tokens.is_empty() {
                return None;
            }
            Some(format!("{column} : \"{}\"", tokens.join(" ")))
        }
        ClauseKind::Term(text) => {
            let tokens = searchable_tokens(text.split_whitespace());
            if tokens.is_empty() {
                return None;
            }
            let alternatives = tokens
                .iter()
                .map(|token| format!("\"{token}\""))
                .collect::<Vec<String>>();
            Some(format!("{column} : ({})", alternatives.join(" OR ")))
        }
    }
}

fn searchable_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> Vec<String> {
    tokens
        .map(|token| token.replace('"', ""))
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .collect::<Vec<String>>()
}
