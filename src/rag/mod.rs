//! Retrieval pipeline components.
//!
//! # Module Structure
//!
//! - [`rag::chunker`](crate::rag::chunker) - Overlapping character windows with page provenance
//! - [`rag::embeddings`](crate::rag::embeddings) - OpenAI-compatible embedding client
//! - [`rag::indexer`](crate::rag::indexer) - Per-category knowledge indexing
//!
//! # Indexing Flow
//!
//! 1. **Chunking** - Each knowledge item is split into 512-char windows with 50-char overlap
//! 2. **Embedding** - Chunk texts are embedded in batches
//! 3. **Storage** - One write per item, tagged with category metadata
//!
//! # Example
//!
//! ```ignore
//! use meeple_rag::rag::indexer::KnowledgeIndexer;
//!
//! let indexer = KnowledgeIndexer::new(embedder, store);
//! let summary = indexer.index_category("chess", &items, &cancel).await?;
//! println!("{} chunks", summary.total_chunks);
//! ```

pub mod chunker;
pub mod embeddings;
pub mod indexer;
