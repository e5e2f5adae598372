//! Knowledge indexing: chunk, embed and write each item of a category.
//!
//! Items are processed one at a time. An item whose embedding fails is
//! skipped and recorded; the rest of the batch still runs. An item is written
//! with a single `index_chunks` call after all of its vectors exist, so it is
//! never partially indexed.

use crate::db::vectorstore::{
    CategoryMetadata, IndexSummary, IndexedChunk, VectorStore, VectorStoreError,
};
use crate::rag::chunker::{ChunkerConfig, PageMap, TextChunker};
use crate::rag::embeddings::{embed_batched, EmbeddingBatch, EmbeddingError, Embedder};
use crate::types::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Subcategory bucket for items that do not name one.
pub const DEFAULT_SUBCATEGORY: &str = "general";

const DEFAULT_BATCH_SIZE: usize = 64;

/// One knowledge entry as supplied by the upload side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    pub source_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub content: String,
    /// Character offsets into `content` at which each page starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_offsets: Option<Vec<usize>>,
}

impl KnowledgeItem {
    fn heading(&self) -> String {
        format!("{}\n\n", self.title)
    }

    /// Title and content, as embedded.
    pub fn full_text(&self) -> String {
        format!("{}{}", self.heading(), self.content)
    }

    /// Page map over [`full_text`](Self::full_text). The heading belongs to
    /// the first page.
    fn page_map(&self) -> std::result::Result<Option<PageMap>, String> {
        let Some(ref offsets) = self.page_offsets else {
            return Ok(None);
        };
        let shift = self.heading().chars().count();
        let starts: Vec<usize> = offsets
            .iter()
            .enumerate()
            .map(|(i, &o)| if i == 0 { o } else { o + shift })
            .collect();
        PageMap::new(starts).map(Some).map_err(|e| e.to_string())
    }
}

/// Retry schedule for transient embedding failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// What happened to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Indexed {
        source_id: String,
        subcategory: String,
        chunks: usize,
    },
    Skipped {
        source_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedItem {
    pub source_id: String,
    pub reason: String,
}

/// Result of indexing one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingSummary {
    pub category: String,
    pub total_items: usize,
    pub indexed_items: usize,
    pub total_chunks: usize,
    /// Chunks written per subcategory.
    pub category_counts: BTreeMap<String, usize>,
    pub skipped: Vec<SkippedItem>,
}

impl IndexingSummary {
    /// Fold per-item outcomes into totals. Every outcome is counted, skipped
    /// ones included.
    pub fn from_outcomes(category: &str, outcomes: Vec<ItemOutcome>) -> Self {
        let mut summary = Self {
            category: category.to_string(),
            total_items: outcomes.len(),
            indexed_items: 0,
            total_chunks: 0,
            category_counts: BTreeMap::new(),
            skipped: Vec::new(),
        };

        for outcome in outcomes {
            match outcome {
                ItemOutcome::Indexed {
                    subcategory,
                    chunks,
                    ..
                } => {
                    summary.indexed_items += 1;
                    summary.total_chunks += chunks;
                    *summary.category_counts.entry(subcategory).or_insert(0) += chunks;
                }
                ItemOutcome::Skipped { source_id, reason } => {
                    summary.skipped.push(SkippedItem { source_id, reason });
                }
            }
        }

        summary
    }
}

/// Orchestrates Chunker → Embedder → VectorStore for a named category.
pub struct KnowledgeIndexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chunker: TextChunker,
    batch_size: usize,
    retry: RetryPolicy,
}

impl KnowledgeIndexer {
    /// Indexer with 512/50 chunking, batches of 64 and the default retry policy.
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            chunker: TextChunker::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_chunker(mut self, config: ChunkerConfig) -> Self {
        self.chunker = TextChunker::new(config);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Remove everything previously indexed under `category`.
    pub async fn clear_category(&self, category: &str, cancel: &CancellationToken) -> Result<()> {
        self.store.delete_by_category(category, cancel).await?;
        Ok(())
    }

    /// Index every item under `category`.
    ///
    /// Transient embedding and vector-store failures are retried under the
    /// retry policy. Embedding failures that persist skip the item.
    /// Cancellation and persistent vector-store failures abort the run.
    pub async fn index_category(
        &self,
        category: &str,
        items: &[KnowledgeItem],
        cancel: &CancellationToken,
    ) -> Result<IndexingSummary> {
        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(items.len());

        for item in items {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            outcomes.push(self.index_item(category, item, cancel).await?);
        }

        let summary = IndexingSummary::from_outcomes(category, outcomes);
        info!(
            category,
            total_items = summary.total_items,
            indexed_items = summary.indexed_items,
            total_chunks = summary.total_chunks,
            skipped = summary.skipped.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Category indexed"
        );
        Ok(summary)
    }

    async fn index_item(
        &self,
        category: &str,
        item: &KnowledgeItem,
        cancel: &CancellationToken,
    ) -> Result<ItemOutcome> {
        let skip = |reason: String| {
            warn!(category, source_id = %item.source_id, reason = %reason, "Skipping item");
            Ok(ItemOutcome::Skipped {
                source_id: item.source_id.clone(),
                reason,
            })
        };

        let pages = match item.page_map() {
            Ok(pages) => pages,
            Err(reason) => return skip(format!("invalid page offsets: {}", reason)),
        };

        let chunks = self
            .chunker
            .chunk_with_pages(&item.full_text(), pages.as_ref());
        if chunks.is_empty() {
            return skip("no content to index".to_string());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batch = match self.embed_with_retry(&texts, cancel).await {
            Ok(batch) => batch,
            Err(EmbeddingError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => return skip(e.to_string()),
        };
        if batch.vectors.len() != chunks.len() {
            return skip(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                batch.vectors.len()
            ));
        }

        let metadata = CategoryMetadata {
            category: category.to_string(),
            subcategory: item.subcategory.clone(),
            title: item.title.clone(),
            source_id: item.source_id.clone(),
        };
        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(batch.vectors)
            .enumerate()
            .map(|(chunk_index, (chunk, embedding))| IndexedChunk {
                chunk,
                embedding,
                metadata: metadata.clone(),
                chunk_index,
            })
            .collect();

        let written = self
            .write_with_retry(category, &indexed, cancel)
            .await
            .map_err(|e| match e {
                VectorStoreError::Cancelled => AppError::Cancelled,
                other => AppError::VectorStore(other),
            })?;

        debug!(
            category,
            source_id = %item.source_id,
            chunks = written.indexed_count,
            tokens = batch.usage.total_tokens,
            "Item indexed"
        );

        Ok(ItemOutcome::Indexed {
            source_id: item.source_id.clone(),
            subcategory: item
                .subcategory
                .clone()
                .unwrap_or_else(|| DEFAULT_SUBCATEGORY.to_string()),
            chunks: written.indexed_count,
        })
    }

    /// `index_chunks` replaces the item's prior vectors, so a retried write
    /// never duplicates chunks.
    async fn write_with_retry(
        &self,
        category: &str,
        chunks: &[IndexedChunk],
        cancel: &CancellationToken,
    ) -> std::result::Result<IndexSummary, VectorStoreError> {
        let mut attempt = 0;
        loop {
            match self.store.index_chunks(category, chunks, cancel).await {
                Ok(summary) => return Ok(summary),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        category,
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient vector store failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(VectorStoreError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn embed_with_retry(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> std::result::Result<EmbeddingBatch, EmbeddingError> {
        let mut attempt = 0;
        loop {
            match embed_batched(self.embedder.as_ref(), texts, self.batch_size, cancel).await {
                Ok(batch) => return Ok(batch),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient embedding failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
