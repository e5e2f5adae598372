//! Evaluation run execution.
//!
//! A run moves `Loaded → Running → Completed | Failed`. Per-query failures
//! stay inside the run as failed [`QueryResult`]s; only cancellation fails
//! the run, and a cancelled run produces no report.

use super::dataset::{EvaluationDataset, EvaluationQuery};
use super::gates::QualityThresholds;
use super::report::{EvaluationReport, QueryResult, ReportBuilder};
use super::EvaluationError;
use crate::db::vectorstore::{VectorStore, VectorStoreError};
use crate::rag::embeddings::{Embedder, EmbeddingError};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Loaded,
    Running,
    Completed,
    Failed,
}

/// Per-run settings, validated before any query is issued.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOptions {
    pub top_k: usize,
    /// Maximum queries in flight at once. 1 runs sequentially.
    pub concurrency: usize,
    /// K values reported for Precision@K and Recall@K.
    pub precision_ks: Vec<usize>,
    pub thresholds: QualityThresholds,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            concurrency: 1,
            precision_ks: vec![1, 3, 5, 10],
            thresholds: QualityThresholds::default(),
        }
    }
}

impl EvaluationOptions {
    pub fn validate(&self) -> Result<(), EvaluationError> {
        if self.top_k == 0 {
            return Err(EvaluationError::InvalidConfiguration(
                "top_k must be greater than zero".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(EvaluationError::InvalidConfiguration(
                "concurrency must be greater than zero".into(),
            ));
        }
        if self.precision_ks.contains(&0) {
            return Err(EvaluationError::InvalidConfiguration(
                "precision K values must be greater than zero".into(),
            ));
        }
        self.thresholds.validate()
    }

    /// Sorted, deduplicated K values, always including the gate K.
    pub fn effective_ks(&self) -> Vec<usize> {
        let mut ks = self.precision_ks.clone();
        ks.push(self.thresholds.precision_gate_k);
        ks.sort_unstable();
        ks.dedup();
        ks
    }
}

/// One run over one dataset.
#[derive(Debug)]
pub struct EvaluationRun {
    id: uuid::Uuid,
    dataset: EvaluationDataset,
    state: RunState,
}

impl EvaluationRun {
    /// Validate the dataset and enter `Loaded`.
    pub fn load(dataset: EvaluationDataset) -> Result<Self, EvaluationError> {
        dataset.validate()?;
        Ok(Self {
            id: uuid::Uuid::new_v4(),
            dataset,
            state: RunState::Loaded,
        })
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn dataset(&self) -> &EvaluationDataset {
        &self.dataset
    }

    fn transition(&mut self, to: RunState) -> Result<(), EvaluationError> {
        let allowed = matches!(
            (self.state, to),
            (RunState::Loaded, RunState::Running)
                | (RunState::Running, RunState::Completed)
                | (RunState::Running, RunState::Failed)
        );
        if !allowed {
            return Err(EvaluationError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!(run_id = %self.id, from = ?self.state, to = ?to, "Run state changed");
        self.state = to;
        Ok(())
    }

    /// Issue every query and build the report.
    ///
    /// Percentiles are computed only after all results are in, so a slow
    /// query never holds up the others' measurements.
    pub async fn execute(
        &mut self,
        engine: &EvaluationEngine,
        options: &EvaluationOptions,
        cancel: &CancellationToken,
    ) -> Result<EvaluationReport, EvaluationError> {
        options.validate()?;
        self.transition(RunState::Running)?;

        let ks = options.effective_ks();
        let start = Instant::now();
        info!(
            run_id = %self.id,
            dataset = %self.dataset.name,
            version = %self.dataset.version,
            queries = self.dataset.len(),
            top_k = options.top_k,
            concurrency = options.concurrency,
            "Evaluation started"
        );

        let mut collected: Vec<(usize, Option<QueryResult>)> =
            stream::iter(self.dataset.queries.iter().enumerate())
                .map(|(position, query)| {
                    let ks = &ks;
                    async move {
                        let result = engine.run_query(query, options.top_k, ks, cancel).await;
                        (position, result)
                    }
                })
                .buffer_unordered(options.concurrency)
                .collect()
                .await;

        if cancel.is_cancelled() || collected.iter().any(|(_, r)| r.is_none()) {
            self.transition(RunState::Failed)?;
            warn!(
                run_id = %self.id,
                completed = collected.iter().filter(|(_, r)| r.is_some()).count(),
                "Evaluation cancelled, discarding partial results"
            );
            return Err(EvaluationError::Cancelled);
        }

        collected.sort_by_key(|(position, _)| *position);
        let results: Vec<QueryResult> = collected.into_iter().filter_map(|(_, r)| r).collect();

        let report = ReportBuilder::new(&self.dataset)
            .top_k(options.top_k)
            .precision_ks(ks)
            .thresholds(options.thresholds.clone())
            .results(results)
            .build();

        self.transition(RunState::Completed)?;
        info!(
            run_id = %self.id,
            dataset = %report.dataset_name,
            success_count = report.success_count,
            total_queries = report.total_queries,
            mrr = report.mean_reciprocal_rank,
            latency_p95_ms = report.latency_p95_ms,
            passed = report.passed_quality_gates,
            duration_ms = start.elapsed().as_millis() as u64,
            "Evaluation completed"
        );
        Ok(report)
    }
}

enum QueryFailure {
    Cancelled,
    Failed(String),
}

impl From<EmbeddingError> for QueryFailure {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::Cancelled => QueryFailure::Cancelled,
            other => QueryFailure::Failed(other.to_string()),
        }
    }
}

impl From<VectorStoreError> for QueryFailure {
    fn from(e: VectorStoreError) -> Self {
        match e {
            VectorStoreError::Cancelled => QueryFailure::Cancelled,
            other => QueryFailure::Failed(other.to_string()),
        }
    }
}

/// Runs queries through the same embed → search path the assistant uses.
///
/// Nothing is retried here: a retry would distort the latency measurement.
pub struct EvaluationEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl EvaluationEngine {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Load `dataset` into a fresh run and execute it.
    pub async fn evaluate(
        &self,
        dataset: EvaluationDataset,
        options: &EvaluationOptions,
        cancel: &CancellationToken,
    ) -> Result<EvaluationReport, EvaluationError> {
        let mut run = EvaluationRun::load(dataset)?;
        run.execute(self, options, cancel).await
    }

    /// `None` means the query was cancelled.
    async fn run_query(
        &self,
        query: &EvaluationQuery,
        top_k: usize,
        ks: &[usize],
        cancel: &CancellationToken,
    ) -> Option<QueryResult> {
        let start = Instant::now();
        let outcome = self.retrieve(query, top_k, cancel).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(retrieved) => {
                debug!(
                    query_id = %query.id,
                    category = %query.search_category(),
                    retrieved = retrieved.len(),
                    latency_ms,
                    "Query evaluated"
                );
                Some(QueryResult::success(query, retrieved, latency_ms, ks))
            }
            Err(QueryFailure::Cancelled) => None,
            Err(QueryFailure::Failed(message)) => {
                warn!(
                    query_id = %query.id,
                    category = %query.search_category(),
                    latency_ms,
                    error = %message,
                    "Query failed"
                );
                Some(QueryResult::failure(query, latency_ms, message, ks))
            }
        }
    }

    /// Distinct source ids in rank order.
    async fn retrieve(
        &self,
        query: &EvaluationQuery,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, QueryFailure> {
        let batch = self
            .embedder
            .embed(std::slice::from_ref(&query.query_text), cancel)
            .await?;
        let vector = batch.vectors.into_iter().next().ok_or_else(|| {
            QueryFailure::Failed("embedding response contained no vector".to_string())
        })?;

        let hits = self
            .store
            .search_by_category(query.search_category(), &vector, top_k, cancel)
            .await?;

        let mut seen = HashSet::new();
        Ok(hits
            .into_iter()
            .map(|hit| hit.metadata.source_id)
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }
}
