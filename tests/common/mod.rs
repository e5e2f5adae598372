//! Shared test helpers.

#![allow(dead_code)]

pub mod mocks;

use meeple_rag::rag::indexer::KnowledgeItem;

/// Knowledge item with no subcategory or page offsets.
pub fn item(source_id: &str, title: &str, content: &str) -> KnowledgeItem {
    KnowledgeItem {
        source_id: source_id.to_string(),
        title: title.to_string(),
        subcategory: None,
        content: content.to_string(),
        page_offsets: None,
    }
}

/// Same as [`item`] but tagged with a subcategory.
pub fn item_in(source_id: &str, subcategory: &str, content: &str) -> KnowledgeItem {
    KnowledgeItem {
        subcategory: Some(subcategory.to_string()),
        ..item(source_id, source_id, content)
    }
}
