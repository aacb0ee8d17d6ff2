use serde::Serialize;

use super::rules::{MIN_PENALIZED_LENGTH, Matcher, RuleTable};
use crate::error::SearchError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Adjustment {
    pub base_score: f64,
    pub adjusted_score: f64,
    pub multiplier: f64,
    pub matched_rule: Option<Matcher>,
    pub length_divisor: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ScoreAdjuster {
    table: RuleTable,
}

impl ScoreAdjuster {
    pub fn new(table: RuleTable) -> Self {
        Self { table }
    }

    pub fn adjust(
        &self,
        base_score: f64,
        identifier: &str,
        content_length: u64,
    ) -> Result<f64, SearchError> {
        self.explain(base_score, identifier, content_length)
            .map(|adjustment| adjustment.adjusted_score)
    }

    /// Same computation as [`ScoreAdjuster::adjust`], keeping the intermediate factors.
    pub fn explain(
        &self,
        base_score: f64,
        identifier: &str,
        content_length: u64,
    ) -> Result<Adjustment, SearchError> {
        if content_length == 0 {
            return Err(SearchError::invalid_metadata(
                identifier,
                "content length must be positive",
            ));
        }

        let matched = self.table.first_match(identifier);
        let multiplier = matched.map_or(1.0, |rule| rule.multiplier);
        let mut score = base_score * multiplier;

        let mut length_divisor = None;
        if content_length <= self.table.length_threshold && !self.table.is_length_exempt(identifier)
        {
            // log10 of the clamped length is at least 1, so the divisor stays finite.
            let clamped = content_length.max(MIN_PENALIZED_LENGTH) as f64;
            let divisor = self.table.length_penalty_numerator / clamped.log10();
            score /= divisor;
            length_divisor = Some(divisor);
        }

        Ok(Adjustment {
            base_score,
            adjusted_score: score,
            multiplier,
            matched_rule: matched.map(|rule| rule.matcher.clone()),
            length_divisor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::rules::ScoreRule;

    #[test]
    fn curated_dataset_page_gets_exact_triple_boost() {
        let adjuster = ScoreAdjuster::default();
        let adjusted = adjuster
            .adjust(1.75, "http://archive.ics.uci.edu/ml/datasets.html", 40_000)
            .expect("valid metadata");

        assert_eq!(adjusted, 1.75 * 3.0);
    }

    #[test]
    fn unmatched_long_document_keeps_base_score() {
        let adjuster = ScoreAdjuster::default();
        let adjusted = adjuster
            .adjust(0.42, "http://www.example.org/page", 1501)
            .expect("valid metadata");

        assert_eq!(adjusted, 0.42);
    }

    #[test]
    fn first_matching_rule_applies_not_cumulative() {
        let table = RuleTable {
            rules: vec![
                ScoreRule {
                    matcher: Matcher::Prefix("http://a/".to_string()),
                    multiplier: 2.0,
                },
                ScoreRule {
                    matcher: Matcher::Contains("/deep/".to_string()),
                    multiplier: 5.0,
                },
            ],
            ..RuleTable::default()
        };
        let adjuster = ScoreAdjuster::new(table);

        let adjustment = adjuster
            .explain(1.0, "http://a/deep/page", 10_000)
            .expect("valid metadata");
        assert_eq!(adjustment.adjusted_score, 2.0);
        assert_eq!(
            adjustment.matched_rule,
            Some(Matcher::Prefix("http://a/".to_string()))
        );
    }

    #[test]
    fn down_weight_rules_divide_score() {
        let adjuster = ScoreAdjuster::default();
        let adjusted = adjuster
            .adjust(
                10.0,
                "http://www.ics.uci.edu/~eppstein/pix/2004/index.html",
                5_000,
            )
            .expect("valid metadata");

        assert!((adjusted - 0.5).abs() < 1e-12);
    }

    #[test]
    fn short_documents_are_length_penalized() {
        let adjuster = ScoreAdjuster::default();
        let adjustment = adjuster
            .explain(4.0, "http://www.example.org/short", 1000)
            .expect("valid metadata");

        let divisor = adjustment.length_divisor.expect("penalty applies");
        assert!((divisor - 20.0 / 3.0).abs() < 1e-12);
        assert!((adjustment.adjusted_score - 4.0 * 3.0 / 20.0).abs() < 1e-12);
    }

    #[test]
    fn threshold_is_inclusive() {
        let adjuster = ScoreAdjuster::default();
        let at_threshold = adjuster
            .explain(1.0, "http://www.example.org/", 1500)
            .expect("valid metadata");
        assert!(at_threshold.length_divisor.is_some());
    }

    #[test]
    fn exempt_identifier_skips_length_penalty_but_keeps_multiplier() {
        let adjuster = ScoreAdjuster::default();
        let adjusted = adjuster
            .adjust(1.0, "http://mlearn.ics.uci.edu/", 200)
            .expect("valid metadata");

        assert_eq!(adjusted, 2.0);
    }

    #[test]
    fn tiny_lengths_are_clamped_before_logarithm() {
        let adjuster = ScoreAdjuster::default();
        for length in [1_u64, 2, 9, 10] {
            let adjustment = adjuster
                .explain(1.0, "http://www.example.org/", length)
                .expect("valid metadata");
            assert_eq!(adjustment.length_divisor, Some(20.0));
            assert!(adjustment.adjusted_score.is_finite());
        }
    }

    #[test]
    fn zero_length_is_invalid_metadata() {
        let adjuster = ScoreAdjuster::default();
        let error = adjuster
            .adjust(1.0, "http://www.example.org/", 0)
            .expect_err("zero length must fail");

        assert!(matches!(error, SearchError::InvalidMetadata { .. }));
    }

    #[test]
    fn adjustment_is_deterministic() {
        let adjuster = ScoreAdjuster::default();
        let inputs = [
            ("http://www.ics.uci.edu/faculty/profiles/view.php", 900_u64, 3.3),
            ("http://fano.ics.uci.edu/cites/Document.html", 20_000, 0.7),
            ("http://www.example.org/", 12, 1.1),
        ];

        for (identifier, length, base) in inputs {
            let first = adjuster.adjust(base, identifier, length).expect("valid");
            let second = adjuster.adjust(base, identifier, length).expect("valid");
            assert_eq!(first.to_bits(), second.to_bits());
        }
    }
}
