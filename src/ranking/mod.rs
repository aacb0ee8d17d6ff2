pub mod adjust;
pub mod query;
pub mod rules;
pub mod source;

pub use adjust::ScoreAdjuster;
pub use query::{Field, QueryBuilder, StructuredQuery};
pub use rules::load_rule_table;
pub use source::{CandidateResult, MISSING_IDENTIFIER, RankedResultSource};
