//! Vector Index backends.
//!
//! All knowledge lives in one collection; categories are payload metadata,
//! never separate collections.
//!
//! # Providers
//!
//! - `qdrant` (default) - Qdrant server over gRPC
//! - in-memory - always available, used by tests and dry runs
//!
//! Enable providers via Cargo features:
//! ```toml
//! meeple-rag = { version = "*", default-features = false, features = ["qdrant"] }
//! ```

#![allow(missing_docs)]

// Vector store abstraction layer
pub mod vectorstore;

// Provider implementations
#[cfg(feature = "qdrant")]
pub mod qdrant;

// Re-exports
pub use vectorstore::{
    CategoryMetadata, InMemoryVectorStore, IndexHealth, IndexSummary, IndexedChunk, SearchHit,
    VectorStore, VectorStoreError, VectorStoreProvider,
};

#[cfg(feature = "qdrant")]
pub use qdrant::QdrantVectorStore;
