use std::io::{self, BufWriter, Write};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::info;

use crate::backend::FtsBackend;
use crate::cli::EvaluateArgs;
use crate::evaluation::{
    DEFAULT_BENCHMARK_QUERIES, DirectoryAudit, EvaluationContext, EvaluationReport,
    QueryEvaluation, evaluate,
};
use crate::ranking::{QueryBuilder, RankedResultSource, ScoreAdjuster, load_rule_table};
use crate::util::{default_db_path, read_query_lines, utc_compact_string, write_json_pretty};

pub fn run(args: EvaluateArgs) -> Result<()> {
    let started_ts = Utc::now();
    let k = args.k as usize;
    let cache_root = &args.cache_root;

    let db_path = default_db_path(cache_root, args.db_path.as_deref());
    let oracle_dir = args
        .oracle_dir
        .clone()
        .unwrap_or_else(|| cache_root.join("oracle_rankings"));
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| cache_root.join("system_rankings"));
    let report_path = args.report_path.clone().unwrap_or_else(|| {
        cache_root.join("manifests").join(format!(
            "evaluation_{}.json",
            utc_compact_string(started_ts)
        ))
    });

    let queries = match &args.queries_file {
        Some(path) => read_query_lines(path)?,
        None => DEFAULT_BENCHMARK_QUERIES
            .iter()
            .map(|query| query.to_string())
            .collect::<Vec<String>>(),
    };
    if queries.is_empty() {
        bail!("no benchmark queries to evaluate");
    }

    info!(
        db_path = %db_path.display(),
        oracle_dir = %oracle_dir.display(),
        queries = queries.len(),
        k,
        "starting evaluation"
    );

    let rules = load_rule_table(args.rules.as_deref())?;
    let backend = FtsBackend::open_read_only(&db_path)
        .with_context(|| format!("failed to open search index {}", db_path.display()))?;
    let source =
        RankedResultSource::new(backend, QueryBuilder::default(), ScoreAdjuster::new(rules))
            .with_oversample(args.oversample.map(|factor| factor as usize));

    let context = EvaluationContext::load(&oracle_dir, &queries, k);
    let mut audit = DirectoryAudit::new(&output_dir)?;
    let report = evaluate(&source, &context, &queries, &mut audit);

    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());
    write_summary(&report, &mut output)?;
    output.flush().context("failed to flush evaluation output")?;

    write_json_pretty(&report_path, &report)?;
    info!(path = %report_path.display(), "wrote evaluation report");
    info!(
        evaluated = report.evaluated.len(),
        skipped = report.skipped.len(),
        mean_ndcg = report.mean_ndcg.unwrap_or(0.0),
        "evaluation completed"
    );

    Ok(())
}

pub fn write_summary<W: Write>(report: &EvaluationReport, output: &mut W) -> Result<()> {
    for evaluation in &report.evaluated {
        writeln!(output, "{}", ndcg_line(report.k, evaluation))?;
    }
    for skipped in &report.skipped {
        writeln!(
            output,
            "NDCG@{} of {}: skipped ({})",
            report.k, skipped.query, skipped.reason
        )?;
    }
    match report.mean_ndcg {
        Some(mean) => writeln!(output, "Mean NDCG@{}: {mean:.6}", report.k)?,
        None => writeln!(output, "Mean NDCG@{}: n/a", report.k)?,
    }
    Ok(())
}

fn ndcg_line(k: usize, evaluation: &QueryEvaluation) -> String {
    let values = evaluation
        .ndcg
        .iter()
        .map(|value| format!("{value:.6}"))
        .collect::<Vec<String>>();
    format!("NDCG@{k} of {}: {}", evaluation.query, values.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{OracleRanking, SkippedQuery, evaluate_ranking};

    #[test]
    fn summary_lists_curves_skips_and_mean() {
        let oracle = OracleRanking::from_identifiers(
            "mondego",
            vec!["a".to_string(), "b".to_string()],
        );
        let evaluation = evaluate_ranking(&oracle, &["b".to_string(), "a".to_string()]);
        let report = EvaluationReport {
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            k: 2,
            evaluated: vec![evaluation],
            skipped: vec![SkippedQuery {
                query: "REST".to_string(),
                reason: "missing".to_string(),
            }],
            mean_ndcg: Some(1.0),
        };

        let mut output = Vec::new();
        write_summary(&report, &mut output).expect("summary");
        let text = String::from_utf8(output).expect("utf8");

        assert_eq!(
            text,
            "NDCG@2 of mondego: 0.500000 1.000000\n\
             NDCG@2 of REST: skipped (missing)\n\
             Mean NDCG@2: 1.000000\n"
        );
    }

    #[test]
    fn summary_without_evaluated_queries_has_no_mean() {
        let report = EvaluationReport {
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            k: 5,
            evaluated: Vec::new(),
            skipped: Vec::new(),
            mean_ndcg: None,
        };

        let mut output = Vec::new();
        write_summary(&report, &mut output).expect("summary");
        assert_eq!(String::from_utf8(output).expect("utf8"), "Mean NDCG@5: n/a\n");
    }
}
