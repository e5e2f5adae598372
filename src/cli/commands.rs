//! Subcommand handlers.
//!
//! Each handler returns a [`CommandStatus`]; the binary maps it to an exit
//! code. Errors propagate as [`AppError`] and are printed by the caller.

use super::output::Output;
use super::Commands;
use crate::db::vectorstore::{IndexHealth, VectorStore};
use crate::evaluation::{EvaluationDataset, EvaluationEngine, EvaluationError, ReportWriter};
use crate::rag::embeddings::{Embedder, HttpEmbeddingClient};
use crate::rag::indexer::{KnowledgeIndexer, KnowledgeItem};
use crate::types::{AppError, Result};
use crate::utils::toml_config::AppConfig;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a command ended, for the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    /// The command ran but its verdict is negative (failed gates, unhealthy store).
    Failed,
}

/// Dispatch one parsed subcommand.
pub async fn run(
    command: &Commands,
    config: &AppConfig,
    output: &Output,
    cancel: &CancellationToken,
) -> Result<CommandStatus> {
    match command {
        Commands::Index {
            category,
            input,
            replace,
        } => index(config, output, category, input, *replace, cancel).await,
        Commands::Evaluate {
            dataset,
            top_k,
            concurrency,
            output: output_dir,
            enforce_gates,
        } => {
            evaluate(
                config,
                output,
                EvaluateArgs {
                    dataset,
                    top_k: *top_k,
                    concurrency: *concurrency,
                    output_dir: output_dir.as_deref(),
                    enforce_gates: *enforce_gates,
                },
                cancel,
            )
            .await
        }
        Commands::ValidateDataset { path } => validate_dataset(output, path),
        Commands::Health => health(config, output).await,
        Commands::Config { validate } => show_config(config, output, *validate),
    }
}

fn build_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>> {
    let client = HttpEmbeddingClient::new(config.embedding_client_config()?)?;
    Ok(Arc::new(client))
}

async fn build_store(config: &AppConfig) -> Result<Arc<dyn VectorStore>> {
    let store = config.vector_store_provider()?.create_store().await?;
    Ok(Arc::from(store))
}

async fn index(
    config: &AppConfig,
    output: &Output,
    category: &str,
    input: &Path,
    replace: bool,
    cancel: &CancellationToken,
) -> Result<CommandStatus> {
    let content = fs::read_to_string(input)?;
    let items: Vec<KnowledgeItem> = serde_json::from_str(&content)?;
    if category.trim().is_empty() {
        return Err(AppError::InvalidInput("category must not be empty".into()));
    }

    let indexer = KnowledgeIndexer::new(build_embedder(config)?, build_store(config).await?)
        .with_chunker(config.chunker_config()?)
        .with_batch_size(config.embedding.batch_size)
        .with_retry_policy(config.retry_policy());

    output.header(&format!("Indexing '{}'", category));
    if replace {
        indexer.clear_category(category, cancel).await?;
        output.info("Cleared existing vectors for category");
    }

    let summary = indexer.index_category(category, &items, cancel).await?;

    output.kv("Items", &summary.total_items.to_string());
    output.kv("Indexed", &summary.indexed_items.to_string());
    output.kv("Chunks", &summary.total_chunks.to_string());
    for (subcategory, chunks) in &summary.category_counts {
        output.list_item(&format!("{}: {} chunks", subcategory, chunks));
    }

    if summary.skipped.is_empty() {
        output.success("All items indexed");
    } else {
        output.warning(&format!("{} item(s) skipped", summary.skipped.len()));
        for skipped in &summary.skipped {
            output.list_item(&format!("{}: {}", skipped.source_id, skipped.reason));
        }
    }

    Ok(CommandStatus::Success)
}

struct EvaluateArgs<'a> {
    dataset: &'a Path,
    top_k: Option<usize>,
    concurrency: Option<usize>,
    output_dir: Option<&'a Path>,
    enforce_gates: bool,
}

async fn evaluate(
    config: &AppConfig,
    output: &Output,
    args: EvaluateArgs<'_>,
    cancel: &CancellationToken,
) -> Result<CommandStatus> {
    let dataset = EvaluationDataset::load(args.dataset)?;

    let mut options = config.evaluation_options();
    if let Some(top_k) = args.top_k {
        options.top_k = top_k;
    }
    if let Some(concurrency) = args.concurrency {
        options.concurrency = concurrency;
    }
    options.validate()?;

    let engine = EvaluationEngine::new(build_embedder(config)?, build_store(config).await?);

    output.header(&format!(
        "Evaluating '{}' v{} ({} queries)",
        dataset.name,
        dataset.version,
        dataset.len()
    ));

    let report = match engine.evaluate(dataset, &options, cancel).await {
        Ok(report) => report,
        Err(EvaluationError::Cancelled) => return Err(AppError::Cancelled),
        Err(e) => return Err(e.into()),
    };

    let dir: PathBuf = args
        .output_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.evaluation.output_dir.clone());
    let paths = ReportWriter::write(&report, &dir)?;

    output.table_header(&["Metric", "Value"]);
    output.table_row(&[
        "Succeeded",
        &format!("{}/{}", report.success_count, report.total_queries),
    ]);
    output.table_row(&["MRR", &format!("{:.3}", report.mean_reciprocal_rank)]);
    for (k, value) in &report.precision_at_k {
        output.table_row(&[&format!("Precision@{}", k), &format!("{:.3}", value)]);
    }
    for (k, value) in &report.recall_at_k {
        output.table_row(&[&format!("Recall@{}", k), &format!("{:.3}", value)]);
    }
    output.table_row(&["Latency p50", &format!("{} ms", report.latency_p50_ms)]);
    output.table_row(&["Latency p95", &format!("{} ms", report.latency_p95_ms)]);
    output.table_row(&["Latency p99", &format!("{} ms", report.latency_p99_ms)]);

    if report.passed_quality_gates {
        output.verdict(true, "All quality gates passed");
    } else {
        output.verdict(
            false,
            &format!("{} quality gate(s) failed", report.failures.len()),
        );
        for failure in &report.failures {
            output.list_item(failure);
        }
    }

    output.newline();
    output.kv("JSON report", &paths.json.display().to_string());
    output.kv("Markdown report", &paths.markdown.display().to_string());

    if args.enforce_gates && !report.passed_quality_gates {
        Ok(CommandStatus::Failed)
    } else {
        Ok(CommandStatus::Success)
    }
}

fn validate_dataset(output: &Output, path: &Path) -> Result<CommandStatus> {
    let dataset = EvaluationDataset::load(path)?;

    let mut per_category: BTreeMap<&str, usize> = BTreeMap::new();
    for query in &dataset.queries {
        *per_category.entry(query.search_category()).or_insert(0) += 1;
    }
    let without_relevant = dataset
        .queries
        .iter()
        .filter(|q| q.relevant_doc_ids.is_empty())
        .count();

    output.success(&format!(
        "Dataset '{}' v{} is valid ({} queries)",
        dataset.name,
        dataset.version,
        dataset.len()
    ));
    for (category, count) in per_category {
        output.list_item(&format!("{}: {} queries", category, count));
    }
    if without_relevant > 0 {
        output.warning(&format!(
            "{} query(ies) have no relevant documents; their recall is always 0",
            without_relevant
        ));
    }

    Ok(CommandStatus::Success)
}

async fn health(config: &AppConfig, output: &Output) -> Result<CommandStatus> {
    let store = build_store(config).await?;

    output.header("Vector store");
    output.kv("Provider", store.provider_name());
    output.kv("Collection", store.collection());

    match store.health().await {
        IndexHealth::Healthy => {
            output.success("Healthy");
            Ok(CommandStatus::Success)
        }
        IndexHealth::Degraded(reason) => {
            output.warning(&format!("Degraded: {}", reason));
            Ok(CommandStatus::Success)
        }
        IndexHealth::Unhealthy(reason) => {
            output.error(&format!("Unhealthy: {}", reason));
            Ok(CommandStatus::Failed)
        }
    }
}

fn show_config(config: &AppConfig, output: &Output, validate: bool) -> Result<CommandStatus> {
    output.header("Configuration");
    output.block(&config.to_toml_string()?);

    if validate {
        let warnings = config.validate_with_warnings()?;
        if warnings.is_empty() {
            output.success("Configuration is valid");
        } else {
            output.success("Configuration is valid, with warnings:");
            for warning in warnings {
                output.warning(&warning.to_string());
            }
        }
    }

    Ok(CommandStatus::Success)
}
