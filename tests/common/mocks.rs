//! Mock embedders and vector stores for testing.
//!
//! These stand in for the HTTP client and the remote vector store so
//! indexing and evaluation can be exercised end to end in process.

use async_trait::async_trait;
use meeple_rag::db::vectorstore::{
    IndexHealth, IndexSummary, IndexedChunk, InMemoryVectorStore, SearchHit, VectorStore,
    VectorStoreError,
};
use meeple_rag::rag::embeddings::{Embedder, EmbeddingBatch, EmbeddingError, EmbeddingUsage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Deterministic bag-of-keywords embedder.
///
/// Each dimension counts one vocabulary word in the lowercased text; a
/// trailing constant dimension keeps every vector non-zero.
///
/// # Examples
///
/// ```ignore
/// let embedder = KeywordEmbedder::new(&["castling", "pawn"]);
/// let failing = KeywordEmbedder::new(&["pawn"]).failing_on("corrupt");
/// let flaky = KeywordEmbedder::new(&["pawn"]).with_transient_failures(2);
/// ```
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
    fail_marker: Option<String>,
    transient_failures: AtomicUsize,
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
            fail_marker: None,
            transient_failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Return a permanent API error for any batch containing `marker`.
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_lowercase());
        self
    }

    /// Time out on the next `count` calls, then behave normally.
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Number of `embed` calls so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every text received, in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|word| lower.matches(word.as_str()).count() as f32)
            .collect();
        vector.push(0.1);
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-mock"
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len() + 1
    }

    async fn embed(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<EmbeddingBatch, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(EmbeddingError::Cancelled);
        }
        if texts.is_empty() {
            return Err(EmbeddingError::NoTextsProvided);
        }
        self.inputs.lock().extend(texts.iter().cloned());

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EmbeddingError::Timeout);
        }

        if let Some(ref marker) = self.fail_marker {
            if texts.iter().any(|t| t.to_lowercase().contains(marker)) {
                return Err(EmbeddingError::ApiError {
                    status: 400,
                    body: "input rejected".to_string(),
                });
            }
        }

        Ok(EmbeddingBatch {
            vectors: texts.iter().map(|t| self.vectorize(t)).collect(),
            usage: EmbeddingUsage {
                prompt_tokens: texts.len() as u32,
                total_tokens: texts.len() as u32,
            },
        })
    }
}

/// Never answers; only returns once the token is cancelled.
pub struct PendingEmbedder {
    calls: AtomicUsize,
}

impl PendingEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for PendingEmbedder {
    fn model_name(&self) -> &str {
        "pending-mock"
    }

    fn dimensions(&self) -> usize {
        2
    }

    async fn embed(
        &self,
        _texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<EmbeddingBatch, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        Err(EmbeddingError::Cancelled)
    }
}

/// Wraps a store and fails the next `count` writes with a transport error.
pub struct FlakyStore {
    inner: InMemoryVectorStore,
    write_failures: AtomicUsize,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new(write_failures: usize) -> Self {
        Self {
            inner: InMemoryVectorStore::new("flaky_collection"),
            write_failures: AtomicUsize::new(write_failures),
            writes: AtomicUsize::new(0),
        }
    }

    /// Write attempts so far, failed ones included.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    fn provider_name(&self) -> &'static str {
        "flaky"
    }

    fn collection(&self) -> &str {
        self.inner.collection()
    }

    async fn index_chunks(
        &self,
        category: &str,
        chunks: &[IndexedChunk],
        cancel: &CancellationToken,
    ) -> Result<IndexSummary, VectorStoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let remaining = self.write_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.write_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(VectorStoreError::Transport("connection reset".to_string()));
        }
        self.inner.index_chunks(category, chunks, cancel).await
    }

    async fn search_by_category(
        &self,
        category: &str,
        query: &[f32],
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        self.inner.search_by_category(category, query, limit, cancel).await
    }

    async fn delete_by_category(
        &self,
        category: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, VectorStoreError> {
        self.inner.delete_by_category(category, cancel).await
    }

    async fn health(&self) -> IndexHealth {
        self.inner.health().await
    }
}
