//! Evaluation report value, builder and renderers.
//!
//! Metrics are computed once, in [`ReportBuilder::build`]. The JSON and
//! Markdown views both read the finished [`EvaluationReport`] and never
//! recompute anything.

use super::dataset::EvaluationQuery;
use super::gates::{GateInputs, QualityThresholds};
use super::metrics::{mean, precision_at_k, recall_at_k, reciprocal_rank, LatencyPercentiles};
use super::{EvaluationDataset, EvaluationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Number of rows in each "worst queries" table.
const WORST_QUERY_ROWS: usize = 10;

/// Outcome of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub query_id: String,
    pub category: String,
    pub retrieved_doc_ids: Vec<String>,
    pub latency_ms: u64,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub reciprocal_rank: f64,
    pub precision_at_k: BTreeMap<usize, f64>,
    pub recall_at_k: BTreeMap<usize, f64>,
}

impl QueryResult {
    pub fn success(
        query: &EvaluationQuery,
        retrieved_doc_ids: Vec<String>,
        latency_ms: u64,
        ks: &[usize],
    ) -> Self {
        let relevant = &query.relevant_doc_ids;
        Self {
            query_id: query.id.clone(),
            category: query.search_category().to_string(),
            reciprocal_rank: reciprocal_rank(&retrieved_doc_ids, relevant),
            precision_at_k: ks
                .iter()
                .map(|&k| (k, precision_at_k(&retrieved_doc_ids, relevant, k)))
                .collect(),
            recall_at_k: ks
                .iter()
                .map(|&k| (k, recall_at_k(&retrieved_doc_ids, relevant, k)))
                .collect(),
            retrieved_doc_ids,
            latency_ms,
            succeeded: true,
            error_message: None,
        }
    }

    /// A failed query scores zero on every metric.
    pub fn failure(query: &EvaluationQuery, latency_ms: u64, error: String, ks: &[usize]) -> Self {
        Self {
            query_id: query.id.clone(),
            category: query.search_category().to_string(),
            retrieved_doc_ids: Vec::new(),
            latency_ms,
            succeeded: false,
            error_message: Some(error),
            reciprocal_rank: 0.0,
            precision_at_k: ks.iter().map(|&k| (k, 0.0)).collect(),
            recall_at_k: ks.iter().map(|&k| (k, 0.0)).collect(),
        }
    }
}

/// Aggregate outcome of one run over one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub dataset_name: String,
    pub dataset_version: String,
    pub evaluated_at: DateTime<Utc>,
    pub top_k: usize,
    pub total_queries: usize,
    pub success_count: usize,
    pub success_rate: f64,
    pub mean_reciprocal_rank: f64,
    pub precision_at_k: BTreeMap<usize, f64>,
    pub recall_at_k: BTreeMap<usize, f64>,
    #[serde(rename = "latencyP50", alias = "latencyP50Ms")]
    pub latency_p50_ms: u64,
    #[serde(rename = "latencyP95", alias = "latencyP95Ms")]
    pub latency_p95_ms: u64,
    #[serde(rename = "latencyP99", alias = "latencyP99Ms")]
    pub latency_p99_ms: u64,
    pub thresholds: QualityThresholds,
    pub passed_quality_gates: bool,
    pub failures: Vec<String>,
    pub per_query_results: Vec<QueryResult>,
}

/// Collects per-query results and produces the report.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    dataset_name: String,
    dataset_version: String,
    top_k: usize,
    ks: BTreeSet<usize>,
    thresholds: QualityThresholds,
    evaluated_at: Option<DateTime<Utc>>,
    results: Vec<QueryResult>,
}

impl ReportBuilder {
    pub fn new(dataset: &EvaluationDataset) -> Self {
        Self {
            dataset_name: dataset.name.clone(),
            dataset_version: dataset.version.clone(),
            top_k: 10,
            ks: BTreeSet::new(),
            thresholds: QualityThresholds::default(),
            evaluated_at: None,
            results: Vec::with_capacity(dataset.len()),
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn precision_ks(mut self, ks: impl IntoIterator<Item = usize>) -> Self {
        self.ks = ks.into_iter().collect();
        self
    }

    pub fn thresholds(mut self, thresholds: QualityThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn evaluated_at(mut self, at: DateTime<Utc>) -> Self {
        self.evaluated_at = Some(at);
        self
    }

    pub fn results(mut self, results: Vec<QueryResult>) -> Self {
        self.results = results;
        self
    }

    /// Aggregate everything and check the gates.
    ///
    /// Precision, recall and MRR average over all queries, failed ones
    /// included. Latency percentiles use successful queries only.
    pub fn build(self) -> EvaluationReport {
        let mut ks = self.ks;
        ks.insert(self.thresholds.precision_gate_k);

        let total_queries = self.results.len();
        let success_count = self.results.iter().filter(|r| r.succeeded).count();
        let success_rate = if total_queries == 0 {
            0.0
        } else {
            success_count as f64 / total_queries as f64
        };

        let precision: BTreeMap<usize, f64> = ks
            .iter()
            .map(|&k| (k, mean_at(&self.results, |r| r.precision_at_k.get(&k).copied())))
            .collect();
        let recall: BTreeMap<usize, f64> = ks
            .iter()
            .map(|&k| (k, mean_at(&self.results, |r| r.recall_at_k.get(&k).copied())))
            .collect();

        let rr: Vec<f64> = self.results.iter().map(|r| r.reciprocal_rank).collect();
        let mrr = mean(&rr);

        let latencies: Vec<u64> = self
            .results
            .iter()
            .filter(|r| r.succeeded)
            .map(|r| r.latency_ms)
            .collect();
        let latency = LatencyPercentiles::from_latencies(&latencies);

        let failures = self.thresholds.check(&GateInputs {
            precision_at_k: &precision,
            mean_reciprocal_rank: mrr,
            latency_p95_ms: latency.p95_ms,
            success_rate,
        });
        for failure in &failures {
            tracing::warn!(dataset = %self.dataset_name, gate = %failure, "Quality gate failed");
        }

        EvaluationReport {
            dataset_name: self.dataset_name,
            dataset_version: self.dataset_version,
            evaluated_at: self.evaluated_at.unwrap_or_else(Utc::now),
            top_k: self.top_k,
            total_queries,
            success_count,
            success_rate,
            mean_reciprocal_rank: mrr,
            precision_at_k: precision,
            recall_at_k: recall,
            latency_p50_ms: latency.p50_ms,
            latency_p95_ms: latency.p95_ms,
            latency_p99_ms: latency.p99_ms,
            thresholds: self.thresholds,
            passed_quality_gates: failures.is_empty(),
            failures,
            per_query_results: self.results,
        }
    }
}

fn mean_at(results: &[QueryResult], pick: impl Fn(&QueryResult) -> Option<f64>) -> f64 {
    let values: Vec<f64> = results.iter().map(|r| pick(r).unwrap_or(0.0)).collect();
    mean(&values)
}

// ============================================================================
// Rendering
// ============================================================================

impl EvaluationReport {
    /// Structured form, mirroring the report fields one to one.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Queries ordered by descending latency.
    pub fn slowest_queries(&self, n: usize) -> Vec<&QueryResult> {
        let mut rows: Vec<&QueryResult> = self.per_query_results.iter().collect();
        rows.sort_by(|a, b| b.latency_ms.cmp(&a.latency_ms));
        rows.truncate(n);
        rows
    }

    /// Queries ordered by ascending precision at the gate K.
    pub fn lowest_precision_queries(&self, n: usize) -> Vec<&QueryResult> {
        let k = self.thresholds.precision_gate_k;
        let precision = |r: &QueryResult| r.precision_at_k.get(&k).copied().unwrap_or(0.0);
        let mut rows: Vec<&QueryResult> = self.per_query_results.iter().collect();
        rows.sort_by(|a, b| precision(a).partial_cmp(&precision(b)).unwrap_or(Ordering::Equal));
        rows.truncate(n);
        rows
    }

    /// Narrative form for humans and CI logs.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let gate_k = self.thresholds.precision_gate_k;

        let _ = writeln!(
            md,
            "# Retrieval Evaluation: {} (v{})\n",
            self.dataset_name, self.dataset_version
        );
        let _ = writeln!(
            md,
            "Evaluated at {} with top-K {}.\n",
            self.evaluated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.top_k
        );

        md.push_str("## Summary\n\n| Metric | Value |\n|---|---|\n");
        let _ = writeln!(md, "| Queries | {} |", self.total_queries);
        let _ = writeln!(
            md,
            "| Succeeded | {} ({:.1}%) |",
            self.success_count,
            self.success_rate * 100.0
        );
        let _ = writeln!(md, "| MRR | {:.3} |", self.mean_reciprocal_rank);
        for (k, value) in &self.precision_at_k {
            let _ = writeln!(md, "| Precision@{} | {:.3} |", k, value);
        }
        for (k, value) in &self.recall_at_k {
            let _ = writeln!(md, "| Recall@{} | {:.3} |", k, value);
        }
        let _ = writeln!(md, "| Latency p50 | {} ms |", self.latency_p50_ms);
        let _ = writeln!(md, "| Latency p95 | {} ms |", self.latency_p95_ms);
        let _ = writeln!(md, "| Latency p99 | {} ms |", self.latency_p99_ms);

        md.push_str("\n## Quality Gates\n\n");
        if self.passed_quality_gates {
            md.push_str("**PASSED**\n");
        } else {
            md.push_str("**FAILED**\n\n");
            for failure in &self.failures {
                let _ = writeln!(md, "- {}", failure);
            }
        }

        md.push_str("\n## Slowest Queries\n\n| Query | Category | Latency (ms) | Status |\n|---|---|---|---|\n");
        for r in self.slowest_queries(WORST_QUERY_ROWS) {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} |",
                r.query_id,
                r.category,
                r.latency_ms,
                status(r)
            );
        }

        let _ = write!(
            md,
            "\n## Lowest Precision Queries\n\n| Query | Category | Precision@{} | RR | Status |\n|---|---|---|---|---|\n",
            gate_k
        );
        for r in self.lowest_precision_queries(WORST_QUERY_ROWS) {
            let _ = writeln!(
                md,
                "| {} | {} | {:.3} | {:.3} | {} |",
                r.query_id,
                r.category,
                r.precision_at_k.get(&gate_k).copied().unwrap_or(0.0),
                r.reciprocal_rank,
                status(r)
            );
        }

        let failed: Vec<&QueryResult> = self
            .per_query_results
            .iter()
            .filter(|r| !r.succeeded)
            .collect();
        if !failed.is_empty() {
            md.push_str("\n## Failed Queries\n\n| Query | Error |\n|---|---|\n");
            for r in failed {
                let _ = writeln!(
                    md,
                    "| {} | {} |",
                    r.query_id,
                    r.error_message.as_deref().unwrap_or("unknown").replace('|', "\\|")
                );
            }
        }

        md
    }
}

fn status(result: &QueryResult) -> &'static str {
    if result.succeeded {
        "ok"
    } else {
        "failed"
    }
}

// ============================================================================
// Output
// ============================================================================

/// Paths written by [`ReportWriter::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

/// Writes both report forms next to each other.
pub struct ReportWriter;

impl ReportWriter {
    /// File stem: `<dataset>-<timestamp>`.
    pub fn file_stem(report: &EvaluationReport) -> String {
        let slug: String = report
            .dataset_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        format!(
            "{}-{}",
            slug.trim_matches('-'),
            report.evaluated_at.format("%Y%m%dT%H%M%SZ")
        )
    }

    pub fn write<P: AsRef<Path>>(
        report: &EvaluationReport,
        dir: P,
    ) -> Result<ReportPaths, EvaluationError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| {
            EvaluationError::ReportOutput(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let stem = Self::file_stem(report);
        let paths = ReportPaths {
            json: dir.join(format!("{}.json", stem)),
            markdown: dir.join(format!("{}.md", stem)),
        };

        let json = report
            .to_json()
            .map_err(|e| EvaluationError::ReportOutput(e.to_string()))?;
        fs::write(&paths.json, json).map_err(|e| {
            EvaluationError::ReportOutput(format!("cannot write {}: {}", paths.json.display(), e))
        })?;
        fs::write(&paths.markdown, report.to_markdown()).map_err(|e| {
            EvaluationError::ReportOutput(format!(
                "cannot write {}: {}",
                paths.markdown.display(),
                e
            ))
        })?;

        tracing::info!(
            json = %paths.json.display(),
            markdown = %paths.markdown.display(),
            "Evaluation reports written"
        );
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn query(id: &str, relevant: &[&str]) -> EvaluationQuery {
        EvaluationQuery {
            id: id.to_string(),
            game_id: "chess".to_string(),
            query_text: format!("question {}", id),
            ground_truth_answer: None,
            relevant_doc_ids: relevant.iter().map(|s| s.to_string()).collect(),
            difficulty: None,
            category: None,
        }
    }

    fn dataset() -> EvaluationDataset {
        EvaluationDataset {
            name: "Chess Rules".into(),
            version: "1.0".into(),
            created_at: Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap(),
            queries: vec![],
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn sample_report() -> EvaluationReport {
        let ks = [1, 5];
        ReportBuilder::new(&dataset())
            .precision_ks(ks)
            .evaluated_at(Utc.with_ymd_and_hms(2025, 2, 1, 8, 30, 0).unwrap())
            .results(vec![
                QueryResult::success(&query("q1", &["d1"]), ids(&["d1", "d2"]), 100, &ks),
                QueryResult::success(&query("q2", &["d1"]), ids(&["d2", "d3", "d1"]), 300, &ks),
                QueryResult::failure(&query("q3", &["d1"]), 50, "timeout".into(), &ks),
            ])
            .build()
    }

    #[test]
    fn test_failed_queries_count_toward_mrr_but_not_latency() {
        let report = sample_report();
        assert_eq!(report.total_queries, 3);
        assert_eq!(report.success_count, 2);
        assert!((report.mean_reciprocal_rank - (1.0 + 1.0 / 3.0) / 3.0).abs() < 1e-9);
        assert_eq!(report.latency_p50_ms, 100);
        assert_eq!(report.latency_p99_ms, 300);
    }

    #[test]
    fn test_gate_k_is_always_aggregated() {
        let ks = [1];
        let report = ReportBuilder::new(&dataset())
            .precision_ks(ks)
            .results(vec![QueryResult::success(
                &query("q1", &["d1"]),
                ids(&["d1"]),
                10,
                &[1, 5],
            )])
            .build();
        assert!(report.precision_at_k.contains_key(&5));
        assert!((report.precision_at_k[&5] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_empty_run_has_zero_metrics() {
        let report = ReportBuilder::new(&dataset())
            .thresholds(QualityThresholds::disabled())
            .build();
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(report.latency_p95_ms, 0);
        assert!(report.passed_quality_gates);
    }

    #[test]
    fn test_json_mirrors_report_fields() {
        let report = sample_report();
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["datasetName"], "Chess Rules");
        assert_eq!(json["totalQueries"], 3);
        assert_eq!(json["successCount"], 2);
        assert_eq!(json["passedQualityGates"], false);
        let p5 = json["precisionAtK"]["5"].as_f64().unwrap();
        assert!((p5 - report.precision_at_k[&5]).abs() < 1e-9);
        assert_eq!(json["perQueryResults"][2]["errorMessage"], "timeout");
        assert_eq!(json["latencyP50"], 100);
        assert_eq!(json["latencyP99"], 300);
        assert!(json.get("latencyP95Ms").is_none());

        let parsed = EvaluationReport::from_json(&report.to_json().unwrap()).unwrap();
        assert_eq!(parsed.failures, report.failures);
    }

    #[test]
    fn test_markdown_reflects_report_values() {
        let report = sample_report();
        let md = report.to_markdown();
        assert!(md.contains("# Retrieval Evaluation: Chess Rules (v1.0)"));
        assert!(md.contains(&format!("| MRR | {:.3} |", report.mean_reciprocal_rank)));
        assert!(md.contains("**FAILED**"));
        for failure in &report.failures {
            assert!(md.contains(failure.as_str()));
        }
        assert!(md.contains("## Failed Queries"));
        assert!(md.contains("| q3 | timeout |"));
    }

    #[test]
    fn test_worst_query_ordering() {
        let report = sample_report();
        let slow: Vec<_> = report
            .slowest_queries(2)
            .into_iter()
            .map(|r| r.query_id.as_str())
            .collect();
        assert_eq!(slow, vec!["q2", "q1"]);

        let low = report.lowest_precision_queries(1);
        assert_eq!(low[0].query_id, "q3");
    }

    #[test]
    fn test_writer_emits_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let report = sample_report();
        let paths = ReportWriter::write(&report, dir.path().join("reports")).unwrap();

        assert!(paths.json.ends_with("chess-rules-20250201T083000Z.json"));
        let json = fs::read_to_string(&paths.json).unwrap();
        assert_eq!(json, report.to_json().unwrap());
        assert_eq!(fs::read_to_string(&paths.markdown).unwrap(), report.to_markdown());
    }
}
