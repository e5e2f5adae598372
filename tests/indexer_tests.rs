//! Knowledge indexing tests against the in-memory vector store.

mod common;

use common::mocks::{FlakyStore, KeywordEmbedder};
use common::{item, item_in};
use meeple_rag::db::vectorstore::{InMemoryVectorStore, VectorStore};
use meeple_rag::rag::chunker::ChunkerConfig;
use meeple_rag::rag::indexer::{KnowledgeIndexer, RetryPolicy, DEFAULT_SUBCATEGORY};
use meeple_rag::types::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const VOCABULARY: &[&str] = &["castling", "king", "rook", "pawn", "promotion", "check"];

fn setup(embedder: KeywordEmbedder) -> (Arc<KeywordEmbedder>, Arc<InMemoryVectorStore>, KnowledgeIndexer) {
    let embedder = Arc::new(embedder);
    let store = Arc::new(InMemoryVectorStore::new("test_collection"));
    let indexer = KnowledgeIndexer::new(embedder.clone(), store.clone())
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)));
    (embedder, store, indexer)
}

#[tokio::test]
async fn test_index_category_counts_chunks_per_subcategory() {
    let (_, store, indexer) = setup(KeywordEmbedder::new(VOCABULARY));
    let indexer = indexer.with_chunker(ChunkerConfig::new(100, 10).unwrap());

    let items = vec![
        item_in("rules-castling", "special-moves", &"The king and rook move together. ".repeat(10)),
        item_in("rules-promotion", "special-moves", "A pawn reaching the last rank is promoted."),
        item("faq-check", "Check", "A king in check must escape."),
    ];

    let summary = indexer
        .index_category("chess", &items, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.category, "chess");
    assert_eq!(summary.total_items, 3);
    assert_eq!(summary.indexed_items, 3);
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.total_chunks, store.len());
    assert!(summary.category_counts["special-moves"] >= 2);
    assert_eq!(summary.category_counts[DEFAULT_SUBCATEGORY], 1);
    assert_eq!(
        summary.category_counts.values().sum::<usize>(),
        summary.total_chunks
    );
}

#[tokio::test]
async fn test_failed_item_is_skipped_and_batch_continues() {
    let (_, store, indexer) = setup(KeywordEmbedder::new(VOCABULARY).failing_on("corrupt"));

    let items = vec![
        item("good-1", "Castling", "The king castles with the rook."),
        item("bad", "Broken", "corrupt upload"),
        item("good-2", "Promotion", "A pawn promotes."),
    ];

    let summary = indexer
        .index_category("chess", &items, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.total_items, 3);
    assert_eq!(summary.indexed_items, 2);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].source_id, "bad");
    assert!(summary.skipped[0].reason.contains("400"));

    let hits = store
        .search_by_category("chess", &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0], 10, &CancellationToken::new())
        .await
        .unwrap();
    assert!(hits.iter().all(|h| h.metadata.source_id != "bad"));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (embedder, _, indexer) = setup(KeywordEmbedder::new(VOCABULARY).with_transient_failures(2));

    let summary = indexer
        .index_category(
            "chess",
            &[item("rules", "Castling", "The king castles.")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.indexed_items, 1);
    assert_eq!(embedder.calls(), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let (embedder, store, indexer) =
        setup(KeywordEmbedder::new(VOCABULARY).with_transient_failures(10));
    let indexer = indexer.with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1)));

    let summary = indexer
        .index_category(
            "chess",
            &[item("rules", "Castling", "The king castles.")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.indexed_items, 0);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(embedder.calls(), 3);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_reindexing_replaces_previous_chunks() {
    let (_, store, indexer) = setup(KeywordEmbedder::new(VOCABULARY));
    let cancel = CancellationToken::new();

    indexer
        .index_category("chess", &[item("rules", "Castling", "The king castles.")], &cancel)
        .await
        .unwrap();
    let first = store.len();

    indexer
        .index_category("chess", &[item("rules", "Castling", "The king castles with a rook.")], &cancel)
        .await
        .unwrap();

    assert_eq!(store.len(), first);
    let hits = store
        .search_by_category("chess", &[0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.1], 10, &cancel)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].chunk.text.contains("rook"));
}

#[tokio::test]
async fn test_categories_are_isolated() {
    let (_, store, indexer) = setup(KeywordEmbedder::new(VOCABULARY));
    let cancel = CancellationToken::new();

    indexer
        .index_category("chess", &[item("chess-rules", "King", "The king moves one square.")], &cancel)
        .await
        .unwrap();
    indexer
        .index_category("checkers", &[item("checkers-rules", "King", "A crowned piece is a king.")], &cancel)
        .await
        .unwrap();

    let query = [0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.1];
    let chess = store.search_by_category("chess", &query, 10, &cancel).await.unwrap();
    assert!(chess.iter().all(|h| h.metadata.category == "chess"));
    assert_eq!(chess[0].metadata.source_id, "chess-rules");

    indexer.clear_category("chess", &cancel).await.unwrap();
    assert!(store
        .search_by_category("chess", &query, 10, &cancel)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        store.search_by_category("checkers", &query, 10, &cancel).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_empty_item_is_skipped_without_embedding() {
    let (embedder, _, indexer) = setup(KeywordEmbedder::new(VOCABULARY));

    let summary = indexer
        .index_category("chess", &[item("blank", "", "")], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn test_cancelled_run_aborts() {
    let (_, store, indexer) = setup(KeywordEmbedder::new(VOCABULARY));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = indexer
        .index_category("chess", &[item("rules", "Castling", "The king castles.")], &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Cancelled));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_missing_collection_aborts_indexing() {
    let embedder = Arc::new(KeywordEmbedder::new(VOCABULARY));
    let store = Arc::new(InMemoryVectorStore::without_collection("absent"));
    let indexer = KnowledgeIndexer::new(embedder, store);

    let err = indexer
        .index_category(
            "chess",
            &[item("rules", "Castling", "The king castles.")],
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::VectorStore(_)));
}

#[tokio::test]
async fn test_transient_store_failure_is_retried() {
    let embedder = Arc::new(KeywordEmbedder::new(VOCABULARY));
    let store = Arc::new(FlakyStore::new(1));
    let indexer = KnowledgeIndexer::new(embedder, store.clone())
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)));

    let summary = indexer
        .index_category(
            "chess",
            &[
                item("rules-castling", "Castling", "The king castles with the rook."),
                item("rules-promotion", "Promotion", "A pawn promotes."),
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.indexed_items, 2);
    assert!(summary.skipped.is_empty());
    assert_eq!(store.writes(), 3);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_persistent_store_failure_aborts_after_retries() {
    let embedder = Arc::new(KeywordEmbedder::new(VOCABULARY));
    let store = Arc::new(FlakyStore::new(10));
    let indexer = KnowledgeIndexer::new(embedder, store.clone())
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1)));

    let err = indexer
        .index_category(
            "chess",
            &[item("rules", "Castling", "The king castles.")],
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::VectorStore(_)));
    assert!(err.is_transient());
    assert_eq!(store.writes(), 3);
    assert_eq!(store.len(), 0);
}
