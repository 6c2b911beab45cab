//! The public API façade
//!
//! [`ShoalDb`] wires the durable store, collection manager, ingestor,
//! vector cache, and embedding port together and exposes the full public
//! operation set. Request validation and authorization run here before
//! any state changes; search results are enriched with document context
//! on the way out.
//!
//! Every operation takes the caller's principal explicitly; the host
//! transport decides what a principal is.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::cache::{CacheConfig, VectorCache};
use crate::collections::CollectionManager;
use crate::distance::{l2_norm, validate_embedding};
use crate::embeddings::BoxedEmbeddingProvider;
use crate::error::{Result, ShoalError};
use crate::index::CentroidIndex;
use crate::ingest::Ingestor;
use crate::search::{
    normalize_k, search_vectors, SearchOptions, APPROXIMATE_THRESHOLD, DEFAULT_CANDIDATE_FACTOR,
};
use crate::store::DurableStore;
use crate::types::{
    AddDocumentRequest, AdminLevel, BulkEmbedReport, CacheStats, Collection, CollectionWithStats,
    CreateCollectionRequest, DocumentMetadata, Principal, SearchRequest, SemanticChunk,
    StorageStats, Vector, VectorMatch,
};

/// The assembled vector store
pub struct ShoalDb {
    store: DurableStore,
    manager: CollectionManager,
    ingestor: Ingestor,
    cache: Arc<Mutex<VectorCache>>,
    embedder: BoxedEmbeddingProvider,
}

impl ShoalDb {
    /// Open (or create) a store at `path` with default cache bounds
    pub fn open<P: AsRef<Path>>(path: P, embedder: BoxedEmbeddingProvider) -> Result<Self> {
        Self::open_with(path, embedder, CacheConfig::default())
    }

    /// Open with explicit cache bounds
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        embedder: BoxedEmbeddingProvider,
        cache_config: CacheConfig,
    ) -> Result<Self> {
        let store = DurableStore::open(path)?;
        let manager = CollectionManager::new(store.clone());
        let cache = Arc::new(Mutex::new(VectorCache::with_config(cache_config)));
        let ingestor = Ingestor::new(
            store.clone(),
            manager.clone(),
            Arc::clone(&cache),
            Arc::clone(&embedder),
        );
        tracing::info!(provider = embedder.name(), "opened shoal store");
        Ok(Self {
            store,
            manager,
            ingestor,
            cache,
            embedder,
        })
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// Create a collection; the caller becomes genesis admin
    pub fn create_collection(
        &self,
        request: CreateCollectionRequest,
        caller: &str,
    ) -> Result<Collection> {
        self.manager.create(request, caller)
    }

    /// Fetch a collection
    pub fn get_collection(&self, collection_id: &str) -> Result<Option<Collection>> {
        self.manager.try_get(collection_id)
    }

    /// All collections
    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        self.manager.list()
    }

    /// A collection with document and vector counts
    pub fn get_collection_with_stats(&self, collection_id: &str) -> Result<CollectionWithStats> {
        self.manager.get_with_stats(collection_id)
    }

    /// All collections with their counts
    pub fn list_collections_with_stats(&self) -> Result<Vec<CollectionWithStats>> {
        self.manager.list_with_stats()
    }

    /// Update name/description (admin)
    pub fn update_collection_metadata(
        &self,
        collection_id: &str,
        name: Option<String>,
        description: Option<String>,
        caller: &str,
    ) -> Result<()> {
        self.manager
            .update_metadata(collection_id, name, description, caller)
    }

    /// Replace settings (admin); chunking/model changes require an empty
    /// vector set
    pub fn update_collection_settings(
        &self,
        collection_id: &str,
        settings: crate::types::CollectionSettings,
        caller: &str,
    ) -> Result<()> {
        self.manager.update_settings(collection_id, settings, caller)?;
        self.cache.lock().invalidate(collection_id);
        Ok(())
    }

    /// Delete a collection and everything it owns (genesis only)
    pub fn delete_collection(&self, collection_id: &str, caller: &str) -> Result<()> {
        self.manager.delete(collection_id, caller)?;
        self.cache.lock().invalidate(collection_id);
        Ok(())
    }

    // ========================================================================
    // Admin ACL
    // ========================================================================

    /// Add a regular admin (genesis only); duplicates are a no-op
    pub fn add_collection_admin(
        &self,
        collection_id: &str,
        principal: &str,
        caller: &str,
    ) -> Result<()> {
        self.manager.add_admin(collection_id, principal, caller)
    }

    /// Remove a regular admin (genesis only)
    pub fn remove_collection_admin(
        &self,
        collection_id: &str,
        principal: &str,
        caller: &str,
    ) -> Result<()> {
        self.manager.remove_admin(collection_id, principal, caller)
    }

    /// Hand genesis authority to an existing admin (genesis only)
    pub fn transfer_genesis_admin(
        &self,
        collection_id: &str,
        new_genesis: &str,
        caller: &str,
    ) -> Result<()> {
        self.manager
            .transfer_genesis(collection_id, new_genesis, caller)
    }

    /// True if the principal holds any admin role
    pub fn is_collection_admin(&self, collection_id: &str, principal: &str) -> Result<bool> {
        self.manager.is_admin(collection_id, principal)
    }

    /// The principal's authority over a collection
    pub fn get_admin_level(&self, collection_id: &str, principal: &str) -> Result<AdminLevel> {
        self.manager.admin_level(collection_id, principal)
    }

    /// Admin list, genesis included
    pub fn list_collection_admins(&self, collection_id: &str) -> Result<Vec<Principal>> {
        self.manager.list_admins(collection_id)
    }

    /// The genesis admin
    pub fn get_genesis_admin(&self, collection_id: &str) -> Result<Principal> {
        self.manager.genesis_admin(collection_id)
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Store a document without embedding (admin)
    pub fn add_document(
        &self,
        request: AddDocumentRequest,
        caller: &str,
    ) -> Result<DocumentMetadata> {
        self.ingestor.add_document(request, caller)
    }

    /// Store and embed a document (admin); `proxy_url` overrides the
    /// collection's endpoint for this run only
    pub async fn add_document_and_embed(
        &self,
        request: AddDocumentRequest,
        proxy_url: Option<String>,
        caller: &str,
    ) -> Result<DocumentMetadata> {
        self.ingestor
            .add_document_and_embed(request, proxy_url, caller)
            .await
    }

    /// Fetch a document record
    pub fn get_document(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentMetadata>> {
        self.store.get_document(collection_id, document_id)
    }

    /// Rebuild the original content of a document from its chunks
    pub fn get_document_content(&self, collection_id: &str, document_id: &str) -> Result<String> {
        let document = self
            .store
            .get_document(collection_id, document_id)?
            .ok_or_else(|| {
                ShoalError::not_found(format!(
                    "document '{document_id}' in collection '{collection_id}'"
                ))
            })?;
        let chunks = self.store.get_document_chunks(document_id)?;
        Ok(crate::chunker::reassemble_content(&chunks, document.size))
    }

    /// All chunks of a document in position order
    pub fn get_document_chunks(&self, document_id: &str) -> Result<Vec<SemanticChunk>> {
        self.store.get_document_chunks(document_id)
    }

    /// All documents of a collection
    pub fn list_documents(&self, collection_id: &str) -> Result<Vec<DocumentMetadata>> {
        self.manager.get(collection_id)?;
        self.store.list_documents(collection_id)
    }

    /// Delete a document with its chunks and vectors (admin)
    pub fn delete_document(
        &self,
        collection_id: &str,
        document_id: &str,
        caller: &str,
    ) -> Result<()> {
        self.ingestor.delete_document(collection_id, document_id, caller)
    }

    /// Embed (or re-embed) an already-stored document (admin)
    pub async fn embed_existing_document(
        &self,
        collection_id: &str,
        document_id: &str,
        caller: &str,
    ) -> Result<u32> {
        self.ingestor
            .embed_existing_document(collection_id, document_id, caller)
            .await
    }

    /// Embed every non-embedded document of a collection (admin)
    pub async fn bulk_embed_collection(
        &self,
        collection_id: &str,
        caller: &str,
    ) -> Result<BulkEmbedReport> {
        self.ingestor.bulk_embed_collection(collection_id, caller).await
    }

    /// Delete a document's vectors, clearing its embedded flag (admin)
    pub fn delete_document_vectors(
        &self,
        collection_id: &str,
        document_id: &str,
        caller: &str,
    ) -> Result<u32> {
        self.ingestor
            .delete_document_vectors(collection_id, document_id, caller)
    }

    // ========================================================================
    // Vectors
    // ========================================================================

    /// Fetch one vector record
    pub fn get_vector(&self, vector_id: &str) -> Result<Option<Vector>> {
        self.store.get_vector(vector_id)
    }

    /// Number of vectors in a collection
    pub fn get_vector_count(&self, collection_id: &str) -> Result<u64> {
        self.store.vector_count(collection_id)
    }

    /// Dimensionality established by the collection's first vector
    pub fn get_collection_dimensions(&self, collection_id: &str) -> Result<Option<usize>> {
        self.store.collection_dimensions(collection_id)
    }

    /// Insert one pre-computed vector (admin)
    pub fn insert_vector(&self, collection_id: &str, vector: Vector, caller: &str) -> Result<()> {
        self.ingestor.insert_vector(collection_id, vector, caller)
    }

    /// Delete one vector (admin)
    pub fn delete_vector(&self, collection_id: &str, vector_id: &str, caller: &str) -> Result<()> {
        self.ingestor.delete_vector(collection_id, vector_id, caller)
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Embed the query text and run a similarity search
    ///
    /// The request's `filter` is ignored here; use
    /// [`search_filtered`](ShoalDb::search_filtered) for document-scoped
    /// results.
    pub async fn search(&self, request: SearchRequest) -> Result<Vec<VectorMatch>> {
        let options = self.options_from(&request, false);
        let query = self.embed_query(&request.collection_id, &request.query).await?;
        self.search_embedding(&request.collection_id, &query, options)
    }

    /// Like [`search`](ShoalDb::search), honoring the document filter
    pub async fn search_filtered(&self, request: SearchRequest) -> Result<Vec<VectorMatch>> {
        let options = self.options_from(&request, true);
        let query = self.embed_query(&request.collection_id, &request.query).await?;
        self.search_embedding(&request.collection_id, &query, options)
    }

    /// Similarity search with a caller-provided query embedding
    pub fn search_embedding(
        &self,
        collection_id: &str,
        query: &[f32],
        options: SearchOptions,
    ) -> Result<Vec<VectorMatch>> {
        self.manager.get(collection_id)?;
        validate_embedding(query)?;
        let query_norm = l2_norm(query)?;

        let vectors = self.load_vectors(collection_id)?;
        if vectors.is_empty() {
            return Err(ShoalError::not_found(format!(
                "vectors in collection '{collection_id}'"
            )));
        }
        let dim = vectors[0].embedding.len();
        if query.len() != dim {
            return Err(ShoalError::invalid_input(
                "query",
                format!("dimension {} does not match the collection's {dim}", query.len()),
            ));
        }

        let index = if options.use_approximate && vectors.len() >= APPROXIMATE_THRESHOLD {
            Some(self.load_index(collection_id, &vectors))
        } else {
            None
        };

        let hits = search_vectors(&vectors, index.as_deref(), query, query_norm, &options)?;
        self.enrich(collection_id, &vectors, hits)
    }

    /// Rank other documents by similarity to the centroid of a source
    /// document's vectors
    pub fn find_similar_documents(
        &self,
        source_document_id: &str,
        collection_id: &str,
        limit: Option<u32>,
        min_score: Option<f64>,
    ) -> Result<Vec<VectorMatch>> {
        self.manager.get(collection_id)?;
        let source_vectors = self.store.get_document_vectors(source_document_id)?;
        if source_vectors.is_empty() {
            return Err(ShoalError::not_found(format!(
                "vectors for document '{source_document_id}'"
            )));
        }

        let centroid = document_centroid(&source_vectors)?;
        let k = normalize_k(limit);
        let options = SearchOptions {
            // Matches from the source document are filtered out afterwards,
            // so fetch enough extras to keep k results
            k: k + source_vectors.len(),
            min_score,
            filter: None,
            use_approximate: true,
            candidate_factor: DEFAULT_CANDIDATE_FACTOR,
        };

        let mut matches = self.search_embedding(collection_id, &centroid, options)?;
        matches.retain(|m| m.document_id != source_document_id);
        matches.truncate(k);
        Ok(matches)
    }

    /// Run several text queries against one collection
    pub async fn batch_similarity_search(
        &self,
        queries: Vec<String>,
        collection_id: &str,
        limit: Option<u32>,
        min_score: Option<f64>,
    ) -> Result<Vec<Vec<VectorMatch>>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let collection = self.manager.get(collection_id)?;
        let embeddings = self
            .embedder
            .embed(
                &queries,
                &collection.settings.embedding_model,
                &collection.settings.proxy_url,
            )
            .await
            .map_err(ShoalError::Embedding)?;

        let mut results = Vec::with_capacity(embeddings.len());
        for embedding in &embeddings {
            let options = SearchOptions {
                k: normalize_k(limit),
                min_score,
                filter: None,
                use_approximate: true,
                candidate_factor: DEFAULT_CANDIDATE_FACTOR,
            };
            results.push(self.search_embedding(collection_id, embedding, options)?);
        }
        Ok(results)
    }

    /// Embed ad-hoc texts and a query, search in memory, persist nothing
    ///
    /// Shares the embedding port and the scoring code with the persistent
    /// path; intended for quick evaluation of an embedding setup.
    pub async fn demo_vector_similarity(
        &self,
        texts: Vec<String>,
        query: String,
        proxy_url: String,
        limit: Option<u32>,
        min_score: Option<f64>,
    ) -> Result<Vec<VectorMatch>> {
        if texts.is_empty() {
            return Err(ShoalError::invalid_input("texts", "must not be empty"));
        }
        let model = crate::types::CollectionSettings::default().embedding_model;

        let embeddings = self
            .embedder
            .embed(&texts, &model, &proxy_url)
            .await
            .map_err(ShoalError::Embedding)?;
        let query_embeddings = self
            .embedder
            .embed(&[query], &model, &proxy_url)
            .await
            .map_err(ShoalError::Embedding)?;
        let query_embedding = query_embeddings
            .first()
            .ok_or_else(|| ShoalError::invalid_input("query", "no embedding returned"))?;
        let query_norm = l2_norm(query_embedding)?;

        let mut items = Vec::with_capacity(texts.len());
        for (i, embedding) in embeddings.iter().enumerate() {
            let norm = l2_norm(embedding)?;
            items.push(Vector {
                id: format!("item_{i}"),
                document_id: format!("item_{i}"),
                chunk_id: String::new(),
                embedding: embedding.clone(),
                norm,
                model: model.clone(),
                created_at: 0,
            });
        }

        let options = SearchOptions {
            k: limit.map(|k| k as usize).unwrap_or(5).min(crate::types::MAX_SEARCH_K),
            min_score,
            filter: None,
            use_approximate: false,
            candidate_factor: DEFAULT_CANDIDATE_FACTOR,
        };
        let hits = search_vectors(&items, None, query_embedding, query_norm, &options)?;

        Ok(hits
            .into_iter()
            .map(|(score, idx)| VectorMatch {
                score,
                document_id: items[idx].document_id.clone(),
                chunk_id: items[idx].chunk_id.clone(),
                document_title: None,
                chunk_text: Some(texts[idx].clone()),
            })
            .collect())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop every cache entry
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Drop expired cache entries; returns how many were removed
    pub fn cleanup_cache(&self) -> u32 {
        self.cache.lock().cleanup()
    }

    /// Cache occupancy snapshot
    pub fn get_cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Drop one collection's cache entry
    pub fn invalidate_collection_cache(&self, collection_id: &str) {
        self.cache.lock().invalidate(collection_id);
    }

    /// Check (and optionally repair) a collection's vector invariants;
    /// repair requires admin
    pub fn validate_collection_vectors(
        &self,
        collection_id: &str,
        repair: bool,
        caller: &str,
    ) -> Result<Vec<String>> {
        self.manager.get(collection_id)?;
        if repair {
            self.manager.require_admin(collection_id, caller)?;
        }
        let issues = self.store.validate_collection_vectors(collection_id, repair)?;
        if repair {
            self.cache.lock().invalidate(collection_id);
        }
        Ok(issues)
    }

    /// Entry counts per durable region
    pub fn storage_stats(&self) -> Result<StorageStats> {
        self.store.storage_stats()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn options_from(&self, request: &SearchRequest, with_filter: bool) -> SearchOptions {
        SearchOptions {
            k: normalize_k(request.limit),
            min_score: request.min_score,
            filter: if with_filter {
                request
                    .filter
                    .as_ref()
                    .map(|ids| ids.iter().cloned().collect::<HashSet<_>>())
            } else {
                None
            },
            use_approximate: request.use_approximate.unwrap_or(true),
            candidate_factor: DEFAULT_CANDIDATE_FACTOR,
        }
    }

    async fn embed_query(&self, collection_id: &str, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(ShoalError::invalid_input("query", "must not be empty"));
        }
        let collection = self.manager.get(collection_id)?;
        let embeddings = self
            .embedder
            .embed(
                &[query.to_string()],
                &collection.settings.embedding_model,
                &collection.settings.proxy_url,
            )
            .await
            .map_err(ShoalError::Embedding)?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ShoalError::invalid_input("query", "no embedding returned"))
    }

    /// Cached vectors for a collection, populating the cache on miss
    fn load_vectors(&self, collection_id: &str) -> Result<Arc<Vec<Vector>>> {
        if let Some(vectors) = self.cache.lock().get(collection_id) {
            return Ok(vectors);
        }
        let vectors = Arc::new(self.store.get_collection_vectors(collection_id)?);
        if !vectors.is_empty() {
            // May refuse oversized entries; search then reads from the store
            self.cache.lock().insert(collection_id, Arc::clone(&vectors));
        }
        Ok(vectors)
    }

    /// Cached centroid index, building and attaching one on miss
    fn load_index(&self, collection_id: &str, vectors: &[Vector]) -> Arc<CentroidIndex> {
        if let Some(index) = self.cache.lock().get_index(collection_id) {
            return index;
        }
        let index = Arc::new(CentroidIndex::build(vectors));
        self.cache.lock().attach_index(collection_id, Arc::clone(&index));
        index
    }

    /// Attach document titles and chunk texts to raw hits
    fn enrich(
        &self,
        collection_id: &str,
        vectors: &[Vector],
        hits: Vec<(f64, usize)>,
    ) -> Result<Vec<VectorMatch>> {
        let mut matches = Vec::with_capacity(hits.len());
        for (score, idx) in hits {
            let vector = &vectors[idx];
            let document_title = self
                .store
                .get_document(collection_id, &vector.document_id)?
                .map(|d| d.title);
            let chunk_text = self.store.get_chunk(&vector.chunk_id)?.map(|c| c.text);
            matches.push(VectorMatch {
                score,
                document_id: vector.document_id.clone(),
                chunk_id: vector.chunk_id.clone(),
                document_title,
                chunk_text,
            });
        }
        Ok(matches)
    }
}

/// Mean of a document's vectors, used for document-level similarity
fn document_centroid(vectors: &[Vector]) -> Result<Vec<f32>> {
    let dim = vectors[0].embedding.len();
    for vector in vectors {
        if vector.embedding.len() != dim {
            return Err(ShoalError::CorruptState(format!(
                "document vectors disagree on dimension: {} vs {dim}",
                vector.embedding.len()
            )));
        }
    }

    let mut centroid = vec![0.0f32; dim];
    for vector in vectors {
        for (slot, value) in centroid.iter_mut().zip(vector.embedding.iter()) {
            *slot += value;
        }
    }
    let count = vectors.len() as f32;
    for value in &mut centroid {
        *value /= count;
    }
    validate_embedding(&centroid)?;
    Ok(centroid)
}
