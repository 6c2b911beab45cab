//! # Shoal Core
//!
//! Persistent, multi-tenant vector store for single-node, message-driven
//! runtimes: isolated collections of documents, semantic chunks, and
//! dense-vector embeddings over a durable region layout.
//!
//! ## What it does
//!
//! - **Collections**: isolated namespaces with per-collection settings
//!   and a two-tier (genesis/regular) admin ACL
//! - **Ingestion**: boundary-aware overlapping chunking, batched
//!   embedding through an external port, and atomic commit with full
//!   rollback on partial failure
//! - **Search**: exact cosine top-k with deterministic tie-breaks, plus
//!   an on-demand `⌈√N⌉`-cluster centroid index for large collections
//! - **Caching**: a bounded LRU of per-collection vector sets with TTL
//!   expiry and explicit memory accounting
//!
//! ## What it is not
//!
//! Embedding generation itself is out of scope: wire a real provider
//! through [`EmbeddingProvider`]. The bundled [`HashEmbedding`] is a
//! deterministic fixture for tests and demos, not a semantic model.
//!
//! ## Example
//!
//! ```no_run
//! use shoal_core::{CreateCollectionRequest, HashEmbedding, ShoalDb};
//! use std::sync::Arc;
//!
//! # async fn run() -> shoal_core::Result<()> {
//! let db = ShoalDb::open("shoal.redb", Arc::new(HashEmbedding::new(384)))?;
//! db.create_collection(
//!     CreateCollectionRequest {
//!         id: "notes".into(),
//!         name: "Notes".into(),
//!         description: None,
//!         settings: None,
//!     },
//!     "alice",
//! )?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod chunker;
pub mod collections;
pub mod db;
pub mod distance;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod ingest;
pub mod search;
pub mod store;
pub mod types;

// Re-exports
pub use cache::{CacheConfig, VectorCache};
pub use collections::CollectionManager;
pub use db::ShoalDb;
pub use embeddings::{
    BoxedEmbeddingProvider, EmbeddingProvider, HashEmbedding, HttpEmbeddingProvider,
};
pub use error::{ProviderError, Result, ShoalError};
pub use index::CentroidIndex;
pub use ingest::Ingestor;
pub use search::{SearchOptions, APPROXIMATE_THRESHOLD};
pub use store::DurableStore;
pub use types::{
    AddDocumentRequest, AdminLevel, BulkEmbedReport, CacheStats, ChunkId, Collection,
    CollectionId, CollectionSettings, CollectionStats, CollectionWithStats, ContentType,
    CreateCollectionRequest, DocumentId, DocumentMetadata, Principal, SearchRequest,
    SemanticChunk, StorageStats, Vector, VectorId, VectorMatch,
};
