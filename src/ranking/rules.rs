use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LENGTH_THRESHOLD: u64 = 1500;
pub const DEFAULT_LENGTH_PENALTY_NUMERATOR: f64 = 20.0;
pub const MIN_PENALIZED_LENGTH: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    Exact(String),
    Prefix(String),
    Contains(String),
}

impl Matcher {
    pub fn matches(&self, identifier: &str) -> bool {
        match self {
            Self::Exact(value) => identifier == value,
            Self::Prefix(value) => identifier.starts_with(value.as_str()),
            Self::Contains(value) => identifier.contains(value.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRule {
    pub matcher: Matcher,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    /// Evaluated in order; the first matching rule wins.
    pub rules: Vec<ScoreRule>,
    #[serde(default)]
    pub length_exempt: Vec<Matcher>,
    #[serde(default = "default_length_threshold")]
    pub length_threshold: u64,
    #[serde(default = "default_length_penalty_numerator")]
    pub length_penalty_numerator: f64,
}

fn default_length_threshold() -> u64 {
    DEFAULT_LENGTH_THRESHOLD
}

fn default_length_penalty_numerator() -> f64 {
    DEFAULT_LENGTH_PENALTY_NUMERATOR
}

impl RuleTable {
    pub fn first_match(&self, identifier: &str) -> Option<&ScoreRule> {
        self.rules.iter().find(|rule| rule.matcher.matches(identifier))
    }

    pub fn is_length_exempt(&self, identifier: &str) -> bool {
        self.length_exempt
            .iter()
            .any(|matcher| matcher.matches(identifier))
    }

    fn validate(&self) -> Result<()> {
        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.multiplier.is_finite() || rule.multiplier <= 0.0 {
                bail!(
                    "rule {} has a non-positive or non-finite multiplier: {}",
                    index,
                    rule.multiplier
                );
            }
        }
        if !self.length_penalty_numerator.is_finite() || self.length_penalty_numerator <= 0.0 {
            bail!(
                "length_penalty_numerator must be positive: {}",
                self.length_penalty_numerator
            );
        }
        Ok(())
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        let exact = |value: &str, multiplier: f64| ScoreRule {
            matcher: Matcher::Exact(value.to_string()),
            multiplier,
        };
        let contains = |value: &str, multiplier: f64| ScoreRule {
            matcher: Matcher::Contains(value.to_string()),
            multiplier,
        };

        Self {
            rules: vec![
                exact("http://www.ics.uci.edu/", 1.0),
                exact("http://www.ics.uci.edu/grad/", 2.0),
                contains("http://www.ics.uci.edu/grad/courses/", 2.0),
                contains("http://www.ics.uci.edu/grad/degrees/", 2.0),
                contains("http://www.ics.uci.edu/grad/admissions/", 2.0),
                contains("http://www.ics.uci.edu/grad/sao/", 2.0),
                contains("http://www.ics.uci.edu/ugrad/sao/", 2.0),
                exact("http://www.ics.uci.edu/ugrad/", 2.0),
                contains("http://www.ics.uci.edu/prospective/en/degrees/", 3.0),
                contains("http://www.ics.uci.edu/faculty/", 1.5),
                exact("http://archive.ics.uci.edu/ml/", 3.0),
                exact("http://archive.ics.uci.edu/ml/datasets.html", 3.0),
                contains("http://mlearn.ics.uci.edu/", 2.0),
                exact("http://cml.ics.uci.edu/", 3.0),
                contains("http://www.ics.uci.edu/~fielding/", 2.0),
                contains("http://luci.ics.uci.edu/blog/?", 0.2),
                contains("http://cgvw.ics.uci.edu/?", 0.2),
                contains("http://fano.ics.uci.edu/", 0.5),
                contains("http://www.ics.uci.edu/~eppstein/pix/", 0.05),
                contains("http://vcp.ics.uci.edu/content/", 0.1),
            ],
            length_exempt: vec![Matcher::Exact("http://mlearn.ics.uci.edu/".to_string())],
            length_threshold: DEFAULT_LENGTH_THRESHOLD,
            length_penalty_numerator: DEFAULT_LENGTH_PENALTY_NUMERATOR,
        }
    }
}

pub fn load_rule_table(path: Option<&Path>) -> Result<RuleTable> {
    let Some(path) = path else {
        return Ok(RuleTable::default());
    };

    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let table: RuleTable = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse rule table {}", path.display()))?;
    table
        .validate()
        .with_context(|| format!("invalid rule table {}", path.display()))?;

    Ok(table)
}
