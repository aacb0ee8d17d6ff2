use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::SearchBackend;
use crate::error::SearchError;
use crate::ranking::RankedResultSource;
use crate::util::{ensure_directory, now_utc_string};

pub const DEFAULT_BENCHMARK_QUERIES: [&str; 10] = [
    "mondego",
    "machine learning",
    "software engineering",
    "security",
    "student affairs",
    "graduate courses",
    "Crista Lopes",
    "REST",
    "computer games",
    "information retrieval",
];

/// Reference ordering for one query; position `p` carries grade `k - p`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleRanking {
    pub query: String,
    pub identifiers: Vec<String>,
    #[serde(skip)]
    grades: HashMap<String, u32>,
}

impl OracleRanking {
    pub fn from_identifiers(query: &str, identifiers: Vec<String>) -> Self {
        let k = identifiers.len();
        let mut grades = HashMap::with_capacity(k);
        for (position, identifier) in identifiers.iter().enumerate() {
            grades
                .entry(identifier.clone())
                .or_insert((k - position) as u32);
        }

        Self {
            query: query.to_string(),
            identifiers,
            grades,
        }
    }

    pub fn k(&self) -> usize {
        self.identifiers.len()
    }

    pub fn relevance_of(&self, identifier: &str) -> Option<u32> {
        self.grades.get(identifier).copied()
    }

    pub fn ideal_gains(&self) -> Vec<f64> {
        (0..self.k())
            .map(|position| (self.k() - position) as f64)
            .collect::<Vec<f64>>()
    }
}

pub fn oracle_path(oracle_dir: &Path, query: &str) -> PathBuf {
    oracle_dir.join(ranking_file_name(query))
}

pub fn ranking_file_name(query: &str) -> String {
    format!("{}.txt", query.replace(['/', '\\'], "_"))
}

pub fn load_oracle(oracle_dir: &Path, query: &str, k: usize) -> Result<OracleRanking, SearchError> {
    let path = oracle_path(oracle_dir, query);
    let missing = |reason: String| SearchError::OracleDataMissing {
        query: query.to_string(),
        path: path.clone(),
        reason,
    };

    let raw = fs::read_to_string(&path).map_err(|error| missing(error.to_string()))?;
    let identifiers = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(k)
        .map(ToOwned::to_owned)
        .collect::<Vec<String>>();

    if identifiers.len() < k {
        return Err(missing(format!(
            "expected {k} identifiers, found {}",
            identifiers.len()
        )));
    }

    Ok(OracleRanking::from_identifiers(query, identifiers))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedQuery {
    pub query: String,
    pub reason: String,
}

/// Oracle rankings loaded once up front and shared read-only by every evaluation.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    k: usize,
    oracles: BTreeMap<String, OracleRanking>,
    missing: BTreeMap<String, String>,
}

impl EvaluationContext {
    pub fn load(oracle_dir: &Path, queries: &[String], k: usize) -> Self {
        let mut context = Self {
            k,
            ..Self::default()
        };

        for query in queries {
            match load_oracle(oracle_dir, query, k) {
                Ok(oracle) => {
                    context.oracles.insert(query.clone(), oracle);
                }
                Err(error) => {
                    warn!(query = %query, error = %error, "oracle ranking unavailable");
                    context.missing.insert(query.clone(), error.to_string());
                }
            }
        }

        info!(
            loaded = context.oracles.len(),
            missing = context.missing.len(),
            k,
            "evaluation context ready"
        );
        context
    }

    #[cfg(test)]
    pub fn from_oracles(k: usize, oracles: Vec<OracleRanking>) -> Self {
        Self {
            k,
            oracles: oracles
                .into_iter()
                .map(|oracle| (oracle.query.clone(), oracle))
                .collect(),
            missing: BTreeMap::new(),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn oracle(&self, query: &str) -> Option<&OracleRanking> {
        self.oracles.get(query)
    }

    fn missing_reason(&self, query: &str) -> String {
        self.missing
            .get(query)
            .cloned()
            .unwrap_or_else(|| "no oracle ranking loaded".to_string())
    }
}

/// Receives each system ranking before its metric is computed.
pub trait RankingAudit {
    fn record(&mut self, query: &str, ranking: &[String]) -> Result<()>;
}

pub struct DirectoryAudit {
    output_dir: PathBuf,
}

impl DirectoryAudit {
    pub fn new(output_dir: &Path) -> Result<Self> {
        ensure_directory(output_dir)?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }
}

impl RankingAudit for DirectoryAudit {
    fn record(&mut self, query: &str, ranking: &[String]) -> Result<()> {
        let path = self.output_dir.join(ranking_file_name(query));
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for identifier in ranking {
            writeln!(writer, "{identifier}")
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEvaluation {
    pub query: String,
    pub system_ranking: Vec<String>,
    pub gains: Vec<f64>,
    pub system_dcg: Vec<f64>,
    pub oracle_dcg: Vec<f64>,
    pub ndcg: Vec<f64>,
    pub audit_error: Option<String>,
}

impl QueryEvaluation {
    pub fn final_ndcg(&self) -> Option<f64> {
        self.ndcg.last().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub generated_at: String,
    pub k: usize,
    pub evaluated: Vec<QueryEvaluation>,
    pub skipped: Vec<SkippedQuery>,
    pub mean_ndcg: Option<f64>,
}

/// `DCG(0) = g0`, `DCG(p) = DCG(p-1) + g(p) / log2(p + 1)`.
pub fn dcg_curve(gains: &[f64]) -> Vec<f64> {
    let mut curve = Vec::with_capacity(gains.len());
    let mut running = 0.0;
    for (position, gain) in gains.iter().enumerate() {
        running = if position == 0 {
            *gain
        } else {
            running + gain / ((position + 1) as f64).log2()
        };
        curve.push(running);
    }
    curve
}

pub fn ndcg_curve(system_dcg: &[f64], oracle_dcg: &[f64]) -> Vec<f64> {
    system_dcg
        .iter()
        .zip(oracle_dcg)
        .map(|(system, oracle)| if *oracle > 0.0 { system / oracle } else { 0.0 })
        .collect::<Vec<f64>>()
}

pub fn evaluate_ranking(oracle: &OracleRanking, system_ranking: &[String]) -> QueryEvaluation {
    let gains = (0..oracle.k())
        .map(|position| {
            system_ranking
                .get(position)
                .and_then(|identifier| oracle.relevance_of(identifier))
                .map_or(0.0, f64::from)
        })
        .collect::<Vec<f64>>();

    let system_dcg = dcg_curve(&gains);
    let oracle_dcg = dcg_curve(&oracle.ideal_gains());
    let ndcg = ndcg_curve(&system_dcg, &oracle_dcg);

    QueryEvaluation {
        query: oracle.query.clone(),
        system_ranking: system_ranking.to_vec(),
        gains,
        system_dcg,
        oracle_dcg,
        ndcg,
        audit_error: None,
    }
}

pub fn evaluate<B: SearchBackend>(
    source: &RankedResultSource<B>,
    context: &EvaluationContext,
    queries: &[String],
    audit: &mut dyn RankingAudit,
) -> EvaluationReport {
    let mut evaluated = Vec::new();
    let mut skipped = Vec::new();

    for query in queries {
        let results = match source.search(query, context.k()) {
            Ok(results) => results,
            Err(error) => {
                warn!(query = %query, error = %error, "benchmark query failed");
                skipped.push(SkippedQuery {
                    query: query.clone(),
                    reason: error.to_string(),
                });
                continue;
            }
        };

        let system_ranking = results.identifiers();
        if results.shortfall() > 0 {
            warn!(
                query = %query,
                returned = system_ranking.len(),
                k = context.k(),
                "system ranking shorter than k"
            );
        }

        let audit_error = audit
            .record(query, &system_ranking)
            .err()
            .map(|error| format!("{error:#}"));
        if let Some(error) = &audit_error {
            warn!(query = %query, error = %error, "failed to record system ranking");
        }

        let Some(oracle) = context.oracle(query) else {
            let reason = context.missing_reason(query);
            warn!(query = %query, reason = %reason, "skipping query without oracle ranking");
            skipped.push(SkippedQuery {
                query: query.clone(),
                reason,
            });
            continue;
        };

        let mut evaluation = evaluate_ranking(oracle, &system_ranking);
        evaluation.audit_error = audit_error;
        evaluated.push(evaluation);
    }

    let finals = evaluated
        .iter()
        .filter_map(QueryEvaluation::final_ndcg)
        .collect::<Vec<f64>>();
    let mean_ndcg = if finals.is_empty() {
        None
    } else {
        Some(finals.iter().sum::<f64>() / finals.len() as f64)
    };

    EvaluationReport {
        generated_at: now_utc_string(),
        k: context.k(),
        evaluated,
        skipped,
        mean_ndcg,
    }
}
