use std::fmt;

use serde::Serialize;

use crate::error::SearchError;

pub const PHRASE_WEIGHT: f64 = 2.0;
pub const TERM_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Content,
    Title,
}

impl Field {
    pub fn column(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Title => "title",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseKind {
    /// Tokens that must appear adjacent and in order.
    Phrase(Vec<String>),
    /// The whole query string as a single term match.
    Term(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryClause {
    pub field: Field,
    pub kind: ClauseKind,
    pub weight: f64,
}

/// Disjunction of weighted clauses; a document matching any clause is a candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredQuery {
    pub raw: String,
    pub clauses: Vec<QueryClause>,
}

impl fmt::Display for QueryClause {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ClauseKind::Phrase(tokens) => {
                write!(formatter, "{}:\"{}\"", self.field.column(), tokens.join(" "))?
            }
            ClauseKind::Term(text) => write!(formatter, "{}:({})", self.field.column(), text)?,
        }
        if (self.weight - 1.0).abs() > f64::EPSILON {
            write!(formatter, "^{:.1}", self.weight)?;
        }
        Ok(())
    }
}

impl fmt::Display for StructuredQuery {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .clauses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<String>>();
        write!(formatter, "{}", rendered.join(" "))
    }
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    fields: Vec<Field>,
    phrase_weight: f64,
    term_weight: f64,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::for_fields(&[Field::Content, Field::Title])
    }
}

impl QueryBuilder {
    pub fn for_fields(fields: &[Field]) -> Self {
        Self {
            fields: fields.to_vec(),
            phrase_weight: PHRASE_WEIGHT,
            term_weight: TERM_WEIGHT,
        }
    }

    pub fn build(&self, raw_query: &str) -> Result<StructuredQuery, SearchError> {
        let tokens = raw_query
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect::<Vec<String>>();
        if tokens.is_empty() {
            return Err(SearchError::invalid_query(
                "query text is empty or whitespace-only",
            ));
        }

        let whole = raw_query.trim().to_string();
        let mut clauses = Vec::with_capacity(self.fields.len() * 2);

        for field in &self.fields {
            clauses.push(QueryClause {
                field: *field,
                kind: ClauseKind::Phrase(tokens.clone()),
                weight: self.phrase_weight,
            });
        }
        for field in &self.fields {
            clauses.push(QueryClause {
                field: *field,
                kind: ClauseKind::Term(whole.clone()),
                weight: self.term_weight,
            });
        }

        Ok(StructuredQuery {
            raw: whole,
            clauses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_emits_weighted_phrase_and_plain_term_clauses() {
        let query = QueryBuilder::default()
            .build("machine learning")
            .expect("query should build");

        assert_eq!(query.clauses.len(), 4);
        assert_eq!(query.clauses[0].field, Field::Content);
        assert_eq!(query.clauses[1].field, Field::Title);
        assert_eq!(
            query.clauses[0].kind,
            ClauseKind::Phrase(vec!["machine".to_string(), "learning".to_string()])
        );
        assert_eq!(query.clauses[0].weight, 2.0);
        assert_eq!(query.clauses[1].weight, 2.0);

        assert_eq!(query.clauses[2].field, Field::Content);
        assert_eq!(query.clauses[3].field, Field::Title);
        assert_eq!(
            query.clauses[2].kind,
            ClauseKind::Term("machine learning".to_string())
        );
        assert_eq!(query.clauses[2].weight, 1.0);
    }

    #[test]
    fn build_discards_empty_tokens_from_repeated_whitespace() {
        let query = QueryBuilder::default()
            .build("  software   engineering \t")
            .expect("query should build");

        assert_eq!(
            query.clauses[0].kind,
            ClauseKind::Phrase(vec!["software".to_string(), "engineering".to_string()])
        );
        assert_eq!(query.raw, "software   engineering");
    }

    #[test]
    fn build_rejects_whitespace_only_input() {
        for raw in ["", "   ", "\t\n"] {
            let error = QueryBuilder::default()
                .build(raw)
                .expect_err("blank query should fail");
            assert!(matches!(error, SearchError::InvalidQuery { .. }));
        }
    }

    #[test]
    fn single_field_builder_only_targets_that_field() {
        let query = QueryBuilder::for_fields(&[Field::Title])
            .build("REST")
            .expect("query should build");

        assert_eq!(query.clauses.len(), 2);
        assert!(query.clauses.iter().all(|clause| clause.field == Field::Title));
    }

    #[test]
    fn display_renders_boosts_only_for_weighted_clauses() {
        let query = QueryBuilder::default()
            .build("computer games")
            .expect("query should build");

        assert_eq!(
            query.to_string(),
            "content:\"computer games\"^2.0 title:\"computer games\"^2.0 content:(computer games) title:(computer games)"
        );
    }
}
