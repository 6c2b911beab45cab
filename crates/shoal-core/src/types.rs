//! Core data model: identifiers, records, requests, and limits
//!
//! Everything persisted to a durable region derives both `serde` (for
//! external payloads) and `bincode` (for the stored encoding).

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, ShoalError};

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque collection identifier (1-64 chars of `[A-Za-z0-9_-]`)
pub type CollectionId = String;
/// Opaque document identifier
pub type DocumentId = String;
/// Chunk identifier, derived as `<document_id>:c:<position>`
pub type ChunkId = String;
/// Vector identifier, derived as `<document_id>:v:<position>`
pub type VectorId = String;
/// Opaque caller identity
pub type Principal = String;

// ============================================================================
// Limits
// ============================================================================

/// Maximum accepted document size in bytes (10 MiB)
pub const MAX_DOCUMENT_SIZE: usize = 10 * 1024 * 1024;
/// Maximum number of chunks sent to the embedding port in one call
pub const MAX_BATCH_SIZE: usize = 50;
/// Maximum embedding dimensionality accepted at insert
pub const MAX_EMBEDDING_DIMENSIONS: usize = 65_536;
/// Maximum `k` for any search request; larger values are capped silently
pub const MAX_SEARCH_K: usize = 100;
/// Default `k` when a search request does not specify one
pub const DEFAULT_SEARCH_K: usize = 10;

// ============================================================================
// Document types
// ============================================================================

/// Declared content type of an ingested document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum ContentType {
    /// Unstructured plain text
    PlainText,
    /// Markdown source
    Markdown,
    /// HTML source
    Html,
    /// Extracted PDF text
    Pdf,
    /// Anything else, tagged by the caller
    Other(String),
}

impl Default for ContentType {
    fn default() -> Self {
        ContentType::PlainText
    }
}

/// Stored document record (region 1)
#[derive(Clone, Debug, Default, Serialize, Deserialize, Encode, Decode)]
pub struct DocumentMetadata {
    /// Document identifier, unique within its collection
    pub id: DocumentId,
    /// Owning collection
    pub collection_id: CollectionId,
    /// Display title (1-200 chars)
    pub title: String,
    /// Declared content type
    pub content_type: ContentType,
    /// Optional origin URL
    pub source_url: Option<String>,
    /// Optional author
    pub author: Option<String>,
    /// Optional tags (at most 20, each at most 50 chars)
    pub tags: Option<Vec<String>>,
    /// Ingestion timestamp, nanoseconds
    pub timestamp: u64,
    /// Number of stored chunks; always equals the actual chunk count
    pub total_chunks: u32,
    /// Original content length in characters
    pub size: u64,
    /// True iff every chunk has a vector under the collection's current model
    pub is_embedded: bool,
    /// SHA-256 of the original content, lowercase hex
    pub checksum: String,
}

/// One contiguous span of a document, the unit of embedding and retrieval
/// (region 2)
#[derive(Clone, Debug, Default, Serialize, Deserialize, Encode, Decode)]
pub struct SemanticChunk {
    /// `<document_id>:c:<position>`
    pub id: ChunkId,
    /// Owning document
    pub document_id: DocumentId,
    /// Exact substring of the original content
    pub text: String,
    /// Zero-based, dense position within the document
    pub position: u32,
    /// Starting character offset into the original content
    pub char_start: u64,
    /// One past the last character offset
    pub char_end: u64,
    /// Rough token estimate (chars / 4)
    pub token_count: Option<u32>,
}

// ============================================================================
// Vector types
// ============================================================================

/// Dense embedding of a chunk with its precomputed L2 norm (region 3)
#[derive(Clone, Debug, Default, Serialize, Deserialize, Encode, Decode)]
pub struct Vector {
    /// `<document_id>:v:<position>`
    pub id: VectorId,
    /// Owning document
    pub document_id: DocumentId,
    /// The chunk this vector embeds
    pub chunk_id: ChunkId,
    /// Embedding components; all finite, 1-65536 dimensions
    pub embedding: Vec<f32>,
    /// Precomputed L2 norm; always finite and positive
    pub norm: f32,
    /// Model that produced the embedding
    pub model: String,
    /// Creation timestamp, nanoseconds
    pub created_at: u64,
}

/// One search hit, enriched with document context where available
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorMatch {
    /// Cosine similarity in `[-1, 1]`
    pub score: f64,
    /// Document the matching chunk belongs to
    pub document_id: DocumentId,
    /// Matching chunk
    pub chunk_id: ChunkId,
    /// Title of the document, when it could be resolved
    pub document_title: Option<String>,
    /// Text of the matching chunk, when it could be resolved
    pub chunk_text: Option<String>,
}

// ============================================================================
// Collection types
// ============================================================================

/// Per-collection configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct CollectionSettings {
    /// Embedding model identifier, forwarded opaquely to the port
    pub embedding_model: String,
    /// Endpoint the embedding adapter posts to
    pub proxy_url: String,
    /// Target chunk length in characters
    pub chunk_size: u32,
    /// Characters of overlap between adjacent chunks; must be < `chunk_size`
    pub chunk_overlap: u32,
    /// Optional cap on the number of documents
    pub max_documents: Option<u32>,
    /// Advisory flag: hosts may wire `add_document` to the embed pipeline
    pub auto_embed: bool,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            embedding_model: "text-embedding-3-small".to_string(),
            proxy_url: "https://api.openai.com/v1/embeddings".to_string(),
            chunk_size: 512,
            chunk_overlap: 64,
            max_documents: None,
            auto_embed: true,
        }
    }
}

/// Stored collection record (region 0)
#[derive(Clone, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct Collection {
    /// Collection identifier, the primary key
    pub id: CollectionId,
    /// Display name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Creation timestamp, nanoseconds
    pub created_at: u64,
    /// Last mutation timestamp, nanoseconds
    pub updated_at: u64,
    /// The single principal allowed to manage admins and delete the collection
    pub genesis_admin: Principal,
    /// Regular admins; the genesis principal's authority derives from the
    /// field above and does not depend on membership here
    pub admins: Vec<Principal>,
    /// Collection configuration
    pub settings: CollectionSettings,
}

impl Collection {
    /// True if `principal` is the genesis admin or a regular admin
    pub fn is_admin(&self, principal: &str) -> bool {
        self.genesis_admin == principal || self.admins.iter().any(|a| a == principal)
    }
}

/// On-demand counts for a collection
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionStats {
    /// Number of documents
    pub document_count: u32,
    /// Number of stored vectors
    pub vector_count: u32,
    /// Collection creation timestamp
    pub created_at: u64,
    /// Collection last-update timestamp
    pub updated_at: u64,
}

/// A collection together with its computed stats
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionWithStats {
    /// The collection record
    pub collection: Collection,
    /// Computed counts
    pub stats: CollectionStats,
}

/// Caller's authority over a collection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminLevel {
    /// Can manage admins, transfer ownership, and delete the collection
    Genesis,
    /// Can manage content and settings
    Admin,
    /// No admin privileges
    None,
}

// ============================================================================
// Requests
// ============================================================================

/// Parameters for `create_collection`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    /// Requested collection id
    pub id: CollectionId,
    /// Display name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Settings; defaults apply when absent
    pub settings: Option<CollectionSettings>,
}

/// Parameters for `add_document` / `add_document_and_embed`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddDocumentRequest {
    /// Target collection
    pub collection_id: CollectionId,
    /// Document title
    pub title: String,
    /// Full document content
    pub content: String,
    /// Declared content type; `PlainText` when absent
    pub content_type: Option<ContentType>,
    /// Optional origin URL
    pub source_url: Option<String>,
    /// Optional author
    pub author: Option<String>,
    /// Optional tags
    pub tags: Option<Vec<String>>,
}

/// Parameters for `search` / `search_filtered`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Collection to search
    pub collection_id: CollectionId,
    /// Query text, embedded through the collection's configured model
    pub query: String,
    /// Maximum results; defaults to 10, capped at 100
    pub limit: Option<u32>,
    /// Drop results scoring below this value
    pub min_score: Option<f64>,
    /// Restrict results to these documents (`search_filtered` only)
    pub filter: Option<Vec<DocumentId>>,
    /// Allow the approximate index for large collections; defaults to true
    pub use_approximate: Option<bool>,
}

/// Outcome of `bulk_embed_collection`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BulkEmbedReport {
    /// Documents embedded by this run
    pub embedded: u32,
    /// Documents skipped because they were already embedded
    pub skipped: u32,
    /// Documents whose embed attempt failed (and rolled back)
    pub failed: u32,
    /// One message per failed document
    pub errors: Vec<String>,
}

// ============================================================================
// Stats
// ============================================================================

/// Cache occupancy snapshot
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheStats {
    /// Cached collections
    pub entry_count: usize,
    /// Estimated bytes held by the cache
    pub total_memory_bytes: u64,
    /// Configured byte limit
    pub max_memory_bytes: u64,
    /// Configured entry limit
    pub max_entries: usize,
    /// `total / max` in percent
    pub memory_usage_percent: u32,
}

impl CacheStats {
    /// Current usage in MiB
    pub fn memory_mb(&self) -> f64 {
        self.total_memory_bytes as f64 / (1024.0 * 1024.0)
    }

    /// True once usage crosses 80% of the configured limit
    pub fn is_near_limit(&self) -> bool {
        self.memory_usage_percent > 80
    }
}

/// Per-region entry counts
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageStats {
    /// Entries in the collections region
    pub collections: u64,
    /// Entries in the documents region
    pub documents: u64,
    /// Entries in the chunks region
    pub chunks: u64,
    /// Entries in the vectors region
    pub vectors: u64,
}

// ============================================================================
// Identifier derivation and validation
// ============================================================================

/// Current wall-clock time in nanoseconds since the epoch
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// SHA-256 of `content` as lowercase hex
pub fn content_checksum(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derive the chunk id for a document position
pub fn chunk_id_for(document_id: &str, position: u32) -> ChunkId {
    format!("{document_id}:c:{position}")
}

/// Derive the vector id for a document position
pub fn vector_id_for(document_id: &str, position: u32) -> VectorId {
    format!("{document_id}:v:{position}")
}

/// Generate a fresh document id: a short human-readable prefix taken from
/// the title plus a random 64-bit hex suffix
pub fn generate_document_id(title: &str) -> DocumentId {
    use rand::Rng;

    let prefix: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(4)
        .collect::<String>()
        .to_ascii_lowercase();
    let prefix = if prefix.is_empty() { "doc".to_string() } else { prefix };

    let suffix: u64 = rand::thread_rng().gen();
    format!("{prefix}_{suffix:016x}")
}

/// Rough token estimate for English text
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as f32 / 4.0).ceil() as u32
}

const RESERVED_ID_PREFIXES: [&str; 3] = ["__", "admin", "system"];

/// Validate a collection id: 1-64 chars of `[A-Za-z0-9_-]`, not starting
/// with a reserved prefix
pub fn validate_collection_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 {
        return Err(ShoalError::invalid_input(
            "collection_id",
            "must be 1-64 characters",
        ));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ShoalError::invalid_input(
            "collection_id",
            "only ASCII alphanumerics, underscores, and hyphens are allowed",
        ));
    }

    if RESERVED_ID_PREFIXES.iter().any(|p| id.starts_with(p)) {
        return Err(ShoalError::invalid_input(
            "collection_id",
            "reserved prefix",
        ));
    }

    Ok(())
}

/// Validate document content against the size cap
pub fn validate_document_content(content: &str) -> Result<()> {
    if content.is_empty() {
        return Err(ShoalError::invalid_input("content", "must not be empty"));
    }
    if content.len() > MAX_DOCUMENT_SIZE {
        return Err(ShoalError::ResourceExhausted(format!(
            "document content exceeds {} byte limit",
            MAX_DOCUMENT_SIZE
        )));
    }
    Ok(())
}

/// Validate title and tag constraints for a document
pub fn validate_document_fields(title: &str, tags: Option<&[String]>) -> Result<()> {
    if title.is_empty() {
        return Err(ShoalError::invalid_input("title", "must not be empty"));
    }
    if title.len() > 200 {
        return Err(ShoalError::invalid_input(
            "title",
            "must be at most 200 characters",
        ));
    }
    if let Some(tags) = tags {
        if tags.len() > 20 {
            return Err(ShoalError::invalid_input("tags", "at most 20 tags"));
        }
        if tags.iter().any(|t| t.len() > 50) {
            return Err(ShoalError::invalid_input(
                "tags",
                "each tag must be at most 50 characters",
            ));
        }
    }
    Ok(())
}

/// Validate collection settings that the chunker and ingestor depend on
pub fn validate_settings(settings: &CollectionSettings) -> Result<()> {
    if settings.chunk_size == 0 {
        return Err(ShoalError::invalid_input(
            "chunk_size",
            "must be at least 1",
        ));
    }
    if settings.chunk_overlap >= settings.chunk_size {
        return Err(ShoalError::invalid_input(
            "chunk_overlap",
            "must be smaller than chunk_size",
        ));
    }
    if settings.embedding_model.is_empty() {
        return Err(ShoalError::invalid_input(
            "embedding_model",
            "must not be empty",
        ));
    }
    Ok(())
}
