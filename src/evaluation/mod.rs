//! Offline retrieval evaluation.
//!
//! A labelled query dataset is run through the same embed → search path the
//! assistant uses. Each query yields a [`QueryResult`]; the results are folded
//! into one [`EvaluationReport`] with IR metrics, latency percentiles and
//! quality-gate verdicts.
//!
//! # Module Structure
//!
//! - [`dataset`] - Dataset file loading and validation
//! - [`metrics`] - Precision@K, Recall@K, reciprocal rank, nearest-rank percentiles
//! - [`gates`] - Quality thresholds and gate checks
//! - [`report`] - Report value, builder, JSON/Markdown rendering and file output
//! - [`engine`] - Run state machine and query execution
//!
//! # Example
//!
//! ```ignore
//! use meeple_rag::evaluation::{EvaluationDataset, EvaluationEngine, EvaluationOptions};
//!
//! let dataset = EvaluationDataset::load("datasets/chess-v1.json")?;
//! let engine = EvaluationEngine::new(embedder, store);
//! let report = engine.evaluate(dataset, &EvaluationOptions::default(), &cancel).await?;
//! if !report.passed_quality_gates {
//!     eprintln!("{}", report.failures.join("\n"));
//! }
//! ```

pub mod dataset;
pub mod engine;
pub mod gates;
pub mod metrics;
pub mod report;

pub use dataset::{EvaluationDataset, EvaluationQuery};
pub use engine::{EvaluationEngine, EvaluationOptions, EvaluationRun, RunState};
pub use gates::QualityThresholds;
pub use report::{EvaluationReport, QueryResult, ReportBuilder, ReportPaths, ReportWriter};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Invalid evaluation configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Run cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("Evaluation run cancelled")]
    Cancelled,

    #[error("Failed to write report: {0}")]
    ReportOutput(String),
}
