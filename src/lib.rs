//! # meeple-rag
//!
//! Semantic retrieval and offline evaluation pipeline for the MeepleAI
//! board-game rules assistant.
//!
//! ## Overview
//!
//! meeple-rag can be used in two ways:
//!
//! 1. **As a CLI** - Run the `meeple-rag` binary to index knowledge and run evaluations
//! 2. **As a library** - Import the chunker, embedding client, vector index and
//!    evaluation engine into your own service
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use meeple_rag::{AppConfig, EvaluationDataset, EvaluationEngine, KnowledgeIndexer};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = AppConfig::load("meeple-rag.toml")?;
//! let embedder = Arc::new(HttpEmbeddingClient::new(config.embedding_client_config()?)?);
//! let store = Arc::from(config.vector_store_provider()?.create_store().await?);
//! let cancel = CancellationToken::new();
//!
//! // Index a category
//! let indexer = KnowledgeIndexer::new(embedder.clone(), store.clone());
//! let summary = indexer.index_category("chess", &items, &cancel).await?;
//!
//! // Measure retrieval quality
//! let engine = EvaluationEngine::new(embedder, store);
//! let dataset = EvaluationDataset::load("datasets/chess-v1.json")?;
//! let report = engine.evaluate(dataset, &config.evaluation_options(), &cancel).await?;
//! println!("{}", report.to_markdown());
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `qdrant` | Qdrant vector database (default) |
//! | `minimal` | In-memory vector store only |
//!
//! ## Modules
//!
//! - [`rag`] - Chunking, embeddings and knowledge indexing
//! - [`db`] - Category-scoped vector index backends
//! - [`evaluation`] - IR metrics, quality gates and reports
//! - [`cli`] - Command-line interface
//! - [`types`] - Common error handling
//! - [`utils`] - TOML configuration

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// Command-line interface and terminal output.
pub mod cli;
/// Vector index backends (Qdrant, in-memory).
pub mod db;
/// Offline retrieval evaluation.
pub mod evaluation;
/// Chunking, embeddings and indexing.
pub mod rag;
/// Core types (errors).
pub mod types;
/// Configuration utilities (TOML).
pub mod utils;

// Re-export commonly used types
pub use db::{InMemoryVectorStore, IndexHealth, VectorStore, VectorStoreProvider};
pub use evaluation::{
    EvaluationDataset, EvaluationEngine, EvaluationOptions, EvaluationReport, QualityThresholds,
    ReportWriter,
};
pub use rag::chunker::{DocumentChunk, TextChunker};
pub use rag::embeddings::{Embedder, HttpEmbeddingClient};
pub use rag::indexer::{IndexingSummary, KnowledgeIndexer, KnowledgeItem};
pub use types::{AppError, Result};
pub use utils::toml_config::AppConfig;
