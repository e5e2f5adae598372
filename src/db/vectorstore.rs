//! Vector Index abstraction.
//!
//! The index is a single collection in an external vector store. Every stored
//! point carries category metadata, and all reads and writes are scoped by
//! category:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      VectorStore Trait                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │ index_chunks │ search_by_category │ delete_by_category │ health │
//! └──────────────────────────────────────────────────────────────┘
//!             ▲                              ▲
//!      ┌──────┴──────┐                ┌──────┴──────┐
//!      │   Qdrant    │                │  In-memory  │
//!      │ (default)   │                │  (testing)  │
//!      └─────────────┘                └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use meeple_rag::db::vectorstore::{VectorStore, VectorStoreProvider};
//!
//! let store = VectorStoreProvider::InMemory {
//!     collection: "meeple_knowledge".into(),
//! }
//! .create_store()
//! .await?;
//!
//! store.index_chunks("chess", &chunks, &cancel).await?;
//! let hits = store.search_by_category("chess", &query_vector, 10, &cancel).await?;
//! ```

use crate::rag::chunker::DocumentChunk;
use crate::rag::embeddings::EmbeddingVector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VectorStoreError {
    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Invalid search limit {0}: must be greater than zero")]
    InvalidLimit(usize),

    #[error("Chunk for source '{source_id}' is tagged '{found}', expected category '{expected}'")]
    CategoryMismatch {
        expected: String,
        found: String,
        source_id: String,
    },

    #[error("Vector has {found} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Vector store unreachable: {0}")]
    Transport(String),

    #[error("Vector store error: {0}")]
    Backend(String),

    #[error("Vector store operation cancelled")]
    Cancelled,
}

impl VectorStoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VectorStoreError::Transport(_))
    }
}

// ============================================================================
// Data model
// ============================================================================

/// Category-scoping metadata stored alongside every vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMetadata {
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub title: String,
    pub source_id: String,
}

/// A chunk with its vector, ready to be written once.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub chunk: DocumentChunk,
    pub embedding: EmbeddingVector,
    pub metadata: CategoryMetadata,
    /// Position of the chunk within its source document.
    pub chunk_index: usize,
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub chunk: DocumentChunk,
    pub metadata: CategoryMetadata,
    pub chunk_index: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSummary {
    pub indexed_count: usize,
    /// Number of distinct source ids whose previous vectors were replaced.
    /// Sources new to the category are not counted.
    pub replaced_sources: usize,
}

/// Result of a health probe. A missing collection degrades the index
/// without taking the service down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum IndexHealth {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl IndexHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, IndexHealth::Healthy)
    }
}

// ============================================================================
// Vector Store Provider Configuration
// ============================================================================

/// Configuration for vector store providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum VectorStoreProvider {
    /// Qdrant - High-performance vector search engine.
    ///
    /// Requires a running Qdrant server with the collection provisioned.
    #[cfg(feature = "qdrant")]
    Qdrant {
        /// Qdrant server URL (e.g., "http://localhost:6334").
        url: String,
        /// Optional API key for authentication.
        api_key: Option<String>,
        /// Collection holding all categories.
        collection: String,
    },

    /// In-memory vector store for testing and dry runs.
    #[serde(alias = "memory")]
    InMemory {
        /// Collection name reported by health checks.
        collection: String,
    },
}

impl VectorStoreProvider {
    /// Create a vector store instance from this provider configuration.
    pub async fn create_store(&self) -> Result<Box<dyn VectorStore>, VectorStoreError> {
        match self {
            #[cfg(feature = "qdrant")]
            VectorStoreProvider::Qdrant {
                url,
                api_key,
                collection,
            } => {
                let store = super::qdrant::QdrantVectorStore::new(
                    url,
                    api_key.clone(),
                    collection.clone(),
                )?;
                Ok(Box::new(store))
            }

            VectorStoreProvider::InMemory { collection } => {
                Ok(Box::new(InMemoryVectorStore::new(collection.clone())))
            }
        }
    }
}

// ============================================================================
// Vector Store Trait
// ============================================================================

/// Category-scoped vector index.
///
/// Writes become visible to subsequent reads once the write call returns.
/// No cross-client read-after-write guarantee is assumed.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Get the name of this vector store provider.
    fn provider_name(&self) -> &'static str;

    /// Name of the backing collection.
    fn collection(&self) -> &str;

    /// Write chunks for `category`.
    ///
    /// Prior vectors tagged with any source id in `chunks` are deleted first,
    /// so re-indexing a source is safe (at-least-once).
    ///
    /// # Errors
    ///
    /// `CategoryMismatch` if a chunk is tagged with another category,
    /// `CollectionNotFound` if the collection is absent.
    async fn index_chunks(
        &self,
        category: &str,
        chunks: &[IndexedChunk],
        cancel: &CancellationToken,
    ) -> Result<IndexSummary, VectorStoreError>;

    /// Nearest neighbours of `query` within `category`, by descending score.
    /// Equal scores keep insertion order.
    ///
    /// # Errors
    ///
    /// `InvalidLimit` when `limit == 0`.
    async fn search_by_category(
        &self,
        category: &str,
        query: &[f32],
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, VectorStoreError>;

    /// Remove every vector in `category`. Idempotent: returns `true` whether
    /// or not anything was deleted.
    async fn delete_by_category(
        &self,
        category: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, VectorStoreError>;

    /// Probe the backing collection.
    async fn health(&self) -> IndexHealth;
}

/// Checks shared by every backend before a write.
pub(crate) fn validate_chunks(
    category: &str,
    chunks: &[IndexedChunk],
) -> Result<HashSet<String>, VectorStoreError> {
    let mut sources = HashSet::new();
    let expected_dims = chunks.first().map(|c| c.embedding.len()).unwrap_or(0);

    for chunk in chunks {
        if chunk.metadata.category != category {
            return Err(VectorStoreError::CategoryMismatch {
                expected: category.to_string(),
                found: chunk.metadata.category.clone(),
                source_id: chunk.metadata.source_id.clone(),
            });
        }
        if chunk.embedding.len() != expected_dims {
            return Err(VectorStoreError::DimensionMismatch {
                expected: expected_dims,
                found: chunk.embedding.len(),
            });
        }
        sources.insert(chunk.metadata.source_id.clone());
    }

    Ok(sources)
}

/// Sort by descending score. The sort is stable, so callers that hand in
/// hits in insertion order keep that order for ties.
pub(crate) fn rank_hits(hits: &mut Vec<SearchHit>, limit: usize) {
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    hits.truncate(limit);
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// In-Memory Vector Store (for testing)
// ============================================================================

use parking_lot::RwLock;

/// In-memory vector store.
///
/// Points live in a `Vec` in insertion order. `None` models a collection
/// that has not been provisioned.
pub struct InMemoryVectorStore {
    collection: String,
    points: RwLock<Option<Vec<IndexedChunk>>>,
}

impl InMemoryVectorStore {
    /// Create a store with its collection already provisioned.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            points: RwLock::new(Some(Vec::new())),
        }
    }

    /// Create a store whose collection does not exist yet.
    pub fn without_collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            points: RwLock::new(None),
        }
    }

    pub fn create_collection(&self) {
        let mut points = self.points.write();
        if points.is_none() {
            *points = Some(Vec::new());
        }
    }

    /// Number of stored points across all categories.
    pub fn len(&self) -> usize {
        self.points.read().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn not_found(&self) -> VectorStoreError {
        VectorStoreError::CollectionNotFound(self.collection.clone())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn provider_name(&self) -> &'static str {
        "in-memory"
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn index_chunks(
        &self,
        category: &str,
        chunks: &[IndexedChunk],
        cancel: &CancellationToken,
    ) -> Result<IndexSummary, VectorStoreError> {
        if cancel.is_cancelled() {
            return Err(VectorStoreError::Cancelled);
        }
        let sources = validate_chunks(category, chunks)?;

        let mut guard = self.points.write();
        let points = guard.as_mut().ok_or_else(|| self.not_found())?;

        if let (Some(existing), Some(incoming)) = (points.first(), chunks.first()) {
            if existing.embedding.len() != incoming.embedding.len() {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: existing.embedding.len(),
                    found: incoming.embedding.len(),
                });
            }
        }

        let before = points.len();
        let replaced: HashSet<String> = points
            .iter()
            .filter(|p| p.metadata.category == category && sources.contains(&p.metadata.source_id))
            .map(|p| p.metadata.source_id.clone())
            .collect();
        points.retain(|p| {
            !(p.metadata.category == category && sources.contains(&p.metadata.source_id))
        });
        let removed = before - points.len();
        points.extend(chunks.iter().cloned());

        tracing::debug!(
            category,
            indexed = chunks.len(),
            removed,
            "In-memory index updated"
        );

        Ok(IndexSummary {
            indexed_count: chunks.len(),
            replaced_sources: replaced.len(),
        })
    }

    async fn search_by_category(
        &self,
        category: &str,
        query: &[f32],
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        if limit == 0 {
            return Err(VectorStoreError::InvalidLimit(limit));
        }
        if cancel.is_cancelled() {
            return Err(VectorStoreError::Cancelled);
        }

        let guard = self.points.read();
        let points = guard.as_ref().ok_or_else(|| self.not_found())?;

        let mut hits: Vec<SearchHit> = points
            .iter()
            .filter(|p| p.metadata.category == category)
            .map(|p| SearchHit {
                chunk: p.chunk.clone(),
                metadata: p.metadata.clone(),
                chunk_index: p.chunk_index,
                score: cosine_similarity(query, &p.embedding),
            })
            .collect();

        rank_hits(&mut hits, limit);
        Ok(hits)
    }

    async fn delete_by_category(
        &self,
        category: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, VectorStoreError> {
        if cancel.is_cancelled() {
            return Err(VectorStoreError::Cancelled);
        }
        let mut guard = self.points.write();
        let points = guard.as_mut().ok_or_else(|| self.not_found())?;
        points.retain(|p| p.metadata.category != category);
        Ok(true)
    }

    async fn health(&self) -> IndexHealth {
        if self.points.read().is_some() {
            IndexHealth::Healthy
        } else {
            IndexHealth::Degraded(format!("collection '{}' not found", self.collection))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
