use crate::rag::chunker::DocumentChunk;
use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        Condition, CountPointsBuilder, DeletePointsBuilder, Filter, PointStruct, ScoredPoint, SearchPointsBuilder,
        UpsertPointsBuilder, Value,
    },
    Qdrant, QdrantError,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use super::vectorstore::{
    validate_chunks, CategoryMetadata, IndexHealth, IndexSummary, IndexedChunk, SearchHit,
    VectorStore, VectorStoreError,
};

const FIELD_CATEGORY: &str = "category";
const FIELD_SUBCATEGORY: &str = "subcategory";
const FIELD_TITLE: &str = "title";
const FIELD_SOURCE_ID: &str = "source_id";
const FIELD_TEXT: &str = "text";
const FIELD_CHAR_START: &str = "char_start";
const FIELD_CHAR_END: &str = "char_end";
const FIELD_PAGE: &str = "page";
const FIELD_CHUNK_INDEX: &str = "chunk_index";
const FIELD_INDEXED_AT: &str = "indexed_at";
const FIELD_BATCH_POSITION: &str = "batch_position";

/// Search fetches this multiple of `limit` so score ties at the cut are
/// ordered by insertion before truncating.
const TIE_OVERFETCH: usize = 2;

/// Qdrant vector store implementation.
///
/// All categories share one pre-provisioned collection; every point carries
/// its category in the payload and every query filters on it.
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
}

impl QdrantVectorStore {
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection: String,
    ) -> Result<Self, VectorStoreError> {
        let client = if let Some(key) = api_key {
            Qdrant::from_url(url).api_key(key).build()
        } else {
            Qdrant::from_url(url).build()
        }
        .map_err(|e| VectorStoreError::Backend(format!("Failed to create Qdrant client: {}", e)))?;

        Ok(Self { client, collection })
    }

    async fn collection_exists(&self) -> Result<bool, VectorStoreError> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| self.map_error("list collections", e))?;

        Ok(collections
            .collections
            .iter()
            .any(|c| c.name == self.collection))
    }

    /// Number of `source_ids` that already have points in `category`.
    async fn count_existing_sources(
        &self,
        category: &str,
        source_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<usize, VectorStoreError> {
        let mut existing = 0;
        for source_id in source_ids {
            let count = CountPointsBuilder::new(&self.collection)
                .filter(Filter::must([
                    category_filter(category),
                    Condition::matches(FIELD_SOURCE_ID, source_id.clone()),
                ]))
                .exact(true);

            let response = cancellable(cancel, async {
                self.client
                    .count(count)
                    .await
                    .map_err(|e| self.map_error("count existing points", e))
            })
            .await?;

            if response.result.map(|r| r.count).unwrap_or(0) > 0 {
                existing += 1;
            }
        }
        Ok(existing)
    }

    fn map_error(&self, operation: &str, e: QdrantError) -> VectorStoreError {
        let message = e.to_string();
        let lower = message.to_lowercase();
        if lower.contains("not found") || lower.contains("doesn't exist") {
            VectorStoreError::CollectionNotFound(self.collection.clone())
        } else if lower.contains("transport")
            || lower.contains("unavailable")
            || lower.contains("connection")
            || lower.contains("deadline")
        {
            VectorStoreError::Transport(format!("Failed to {}: {}", operation, message))
        } else {
            VectorStoreError::Backend(format!("Failed to {}: {}", operation, message))
        }
    }

    fn to_point(chunk: &IndexedChunk, indexed_at: i64, position: usize) -> PointStruct {
        let mut payload: HashMap<String, Value> = HashMap::new();
        payload.insert(FIELD_CATEGORY.to_string(), chunk.metadata.category.clone().into());
        if let Some(ref sub) = chunk.metadata.subcategory {
            payload.insert(FIELD_SUBCATEGORY.to_string(), sub.clone().into());
        }
        payload.insert(FIELD_TITLE.to_string(), chunk.metadata.title.clone().into());
        payload.insert(FIELD_SOURCE_ID.to_string(), chunk.metadata.source_id.clone().into());
        payload.insert(FIELD_TEXT.to_string(), chunk.chunk.text.clone().into());
        payload.insert(FIELD_CHAR_START.to_string(), (chunk.chunk.char_start as i64).into());
        payload.insert(FIELD_CHAR_END.to_string(), (chunk.chunk.char_end as i64).into());
        if let Some(page) = chunk.chunk.page {
            payload.insert(FIELD_PAGE.to_string(), i64::from(page).into());
        }
        payload.insert(FIELD_CHUNK_INDEX.to_string(), (chunk.chunk_index as i64).into());
        payload.insert(FIELD_INDEXED_AT.to_string(), indexed_at.into());
        payload.insert(FIELD_BATCH_POSITION.to_string(), (position as i64).into());

        PointStruct::new(
            uuid::Uuid::new_v4().to_string(),
            chunk.embedding.clone(),
            payload,
        )
    }

    /// Parse one scored point. Points missing required payload fields are dropped.
    fn parse_point(point: ScoredPoint) -> Option<(SearchHit, (i64, i64))> {
        let payload = point.payload;
        let text = payload.get(FIELD_TEXT)?.as_str()?.to_string();
        let category = payload.get(FIELD_CATEGORY)?.as_str()?.to_string();
        let title = payload.get(FIELD_TITLE)?.as_str()?.to_string();
        let source_id = payload.get(FIELD_SOURCE_ID)?.as_str()?.to_string();
        let subcategory = payload
            .get(FIELD_SUBCATEGORY)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let char_start = payload.get(FIELD_CHAR_START)?.as_integer()? as usize;
        let char_end = payload.get(FIELD_CHAR_END)?.as_integer()? as usize;
        let page = payload
            .get(FIELD_PAGE)
            .and_then(|v| v.as_integer())
            .map(|p| p as u32);
        let chunk_index = payload.get(FIELD_CHUNK_INDEX)?.as_integer()? as usize;
        let indexed_at = payload
            .get(FIELD_INDEXED_AT)
            .and_then(|v| v.as_integer())
            .unwrap_or(0);
        let position = payload
            .get(FIELD_BATCH_POSITION)
            .and_then(|v| v.as_integer())
            .unwrap_or(0);

        Some((
            SearchHit {
                chunk: DocumentChunk {
                    text,
                    char_start,
                    char_end,
                    page,
                },
                metadata: CategoryMetadata {
                    category,
                    subcategory,
                    title,
                    source_id,
                },
                chunk_index,
                score: point.score,
            },
            (indexed_at, position),
        ))
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, VectorStoreError>>,
) -> Result<T, VectorStoreError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(VectorStoreError::Cancelled),
        result = fut => result,
    }
}

fn category_filter(category: &str) -> Condition {
    Condition::matches(FIELD_CATEGORY, category.to_string())
}

/// Score descending, then `(indexed_at, batch_position)` ascending, cut to `limit`.
fn rank_hits(mut ranked: Vec<(SearchHit, (i64, i64))>, limit: usize) -> Vec<SearchHit> {
    ranked.sort_by(|(a, a_order), (b, b_order)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a_order.cmp(b_order))
    });
    ranked.truncate(limit);
    ranked.into_iter().map(|(hit, _)| hit).collect()
}

// ============================================================================
// VectorStore Trait Implementation
// ============================================================================

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn provider_name(&self) -> &'static str {
        "qdrant"
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
        let sources = validate_chunks(category, chunks)?;
        if chunks.is_empty() {
            return Ok(IndexSummary::default());
        }

        let source_ids: Vec<String> = sources.into_iter().collect();
        let replaced_sources = self
            .count_existing_sources(category, &source_ids, cancel)
            .await?;
        let delete = DeletePointsBuilder::new(&self.collection)
            .points(Filter::must([
                category_filter(category),
                Condition::matches(FIELD_SOURCE_ID, source_ids),
            ]))
            .wait(true);

        cancellable(cancel, async {
            self.client
                .delete_points(delete)
                .await
                .map_err(|e| self.map_error("delete previous points", e))
        })
        .await?;

        let indexed_at = chrono::Utc::now().timestamp_millis();
        let points: Vec<PointStruct> = chunks
            .iter()
            .enumerate()
            .map(|(position, chunk)| Self::to_point(chunk, indexed_at, position))
            .collect();
        let count = points.len();

        cancellable(cancel, async {
            self.client
                .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
                .await
                .map_err(|e| self.map_error("upsert points", e))
        })
        .await?;

        tracing::debug!(
            collection = %self.collection,
            category,
            points = count,
            "Qdrant points written"
        );

        Ok(IndexSummary {
            indexed_count: count,
            replaced_sources,
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

        let fetch = limit.saturating_mul(TIE_OVERFETCH);
        let search = SearchPointsBuilder::new(&self.collection, query.to_vec(), fetch as u64)
            .filter(Filter::must([category_filter(category)]))
            .with_payload(true);

        let response = cancellable(cancel, async {
            self.client
                .search_points(search)
                .await
                .map_err(|e| self.map_error("search", e))
        })
        .await?;

        let ranked: Vec<(SearchHit, (i64, i64))> = response
            .result
            .into_iter()
            .filter_map(Self::parse_point)
            .collect();

        Ok(rank_hits(ranked, limit))
    }

    async fn delete_by_category(
        &self,
        category: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, VectorStoreError> {
        let delete = DeletePointsBuilder::new(&self.collection)
            .points(Filter::must([category_filter(category)]))
            .wait(true);

        cancellable(cancel, async {
            self.client
                .delete_points(delete)
                .await
                .map_err(|e| self.map_error("delete category", e))
        })
        .await?;

        tracing::info!(collection = %self.collection, category, "Category cleared");
        Ok(true)
    }

    async fn health(&self) -> IndexHealth {
        match self.collection_exists().await {
            Ok(true) => IndexHealth::Healthy,
            Ok(false) => IndexHealth::Degraded(format!(
                "collection '{}' not found",
                self.collection
            )),
            Err(e) => IndexHealth::Unhealthy(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(source_id: &str, score: f32) -> SearchHit {
        SearchHit {
            chunk: DocumentChunk {
                text: format!("text of {}", source_id),
                char_start: 0,
                char_end: 10,
                page: None,
            },
            metadata: CategoryMetadata {
                category: "chess".to_string(),
                subcategory: None,
                title: source_id.to_string(),
                source_id: source_id.to_string(),
            },
            chunk_index: 0,
            score,
        }
    }

    fn sources(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.metadata.source_id.as_str()).collect()
    }

    #[test]
    fn test_equal_scores_at_the_cut_keep_earliest_inserted() {
        // Server order puts the latest write first among the tied points.
        let fetched = vec![
            (hit("late", 0.8), (2_000, 0)),
            (hit("best", 0.9), (3_000, 0)),
            (hit("early-second", 0.8), (1_000, 1)),
            (hit("early-first", 0.8), (1_000, 0)),
        ];

        let ranked = rank_hits(fetched, 3);
        assert_eq!(sources(&ranked), vec!["best", "early-first", "early-second"]);
    }

    #[test]
    fn test_fewer_hits_than_limit_are_all_returned() {
        let ranked = rank_hits(vec![(hit("only", 0.5), (1, 0))], 5);
        assert_eq!(sources(&ranked), vec!["only"]);
    }
}
