//! Document ingestion: chunking, embedding batches, and rollback
//!
//! Ingestion happens in two phases. The first stores the document and all
//! of its chunks atomically. The second streams chunk batches through the
//! embedding port and commits the returned vectors batch by batch; any
//! failure deletes every vector written so far and leaves the document
//! un-embedded, so a later `embed_existing_document` can retry against
//! the already-stored chunks.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::VectorCache;
use crate::chunker::chunk_text;
use crate::collections::CollectionManager;
use crate::distance::l2_norm;
use crate::embeddings::BoxedEmbeddingProvider;
use crate::error::{ProviderError, Result, ShoalError};
use crate::store::DurableStore;
use crate::types::{
    content_checksum, generate_document_id, now_nanos, validate_document_content,
    validate_document_fields, vector_id_for, AddDocumentRequest, BulkEmbedReport, Collection,
    CollectionId, DocumentId, DocumentMetadata, SemanticChunk, Vector, VectorId, MAX_BATCH_SIZE,
};

type InProgressSet = Arc<Mutex<HashSet<(CollectionId, DocumentId)>>>;

/// End-to-end ingestion pipeline
#[derive(Clone)]
pub struct Ingestor {
    store: DurableStore,
    manager: CollectionManager,
    cache: Arc<Mutex<VectorCache>>,
    embedder: BoxedEmbeddingProvider,
    in_progress: InProgressSet,
}

/// Removes its key from the in-progress set when the embed run ends,
/// successfully or not
struct InProgressGuard {
    set: InProgressSet,
    key: (CollectionId, DocumentId),
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// Pick the embedding batch size from the average chunk length: longer
/// chunks mean fewer texts per request
fn dynamic_batch_size(content_chars: usize, chunk_count: usize) -> usize {
    let avg = content_chars / chunk_count.max(1);
    let batch = if avg > 1000 {
        3
    } else if avg > 500 {
        5
    } else {
        10
    };
    batch.min(MAX_BATCH_SIZE)
}

impl Ingestor {
    /// Pipeline over the shared store, manager, cache, and port
    pub fn new(
        store: DurableStore,
        manager: CollectionManager,
        cache: Arc<Mutex<VectorCache>>,
        embedder: BoxedEmbeddingProvider,
    ) -> Self {
        Self {
            store,
            manager,
            cache,
            embedder,
            in_progress: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn invalidate_cache(&self, collection_id: &str) {
        self.cache.lock().invalidate(collection_id);
    }

    fn acquire_in_progress(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<InProgressGuard> {
        let key = (collection_id.to_string(), document_id.to_string());
        if !self.in_progress.lock().insert(key.clone()) {
            return Err(ShoalError::AlreadyInProgress);
        }
        Ok(InProgressGuard {
            set: Arc::clone(&self.in_progress),
            key,
        })
    }

    /// Store a document and its chunks without embedding (admin)
    pub fn add_document(
        &self,
        request: AddDocumentRequest,
        caller: &str,
    ) -> Result<DocumentMetadata> {
        let collection = self.manager.get(&request.collection_id)?;
        self.manager.require_admin(&request.collection_id, caller)?;
        validate_document_fields(&request.title, request.tags.as_deref())?;
        validate_document_content(&request.content)?;

        if let Some(max_documents) = collection.settings.max_documents {
            let current = self.store.document_count(&collection.id)?;
            if current >= max_documents as u64 {
                return Err(ShoalError::ResourceExhausted(format!(
                    "collection '{}' is capped at {max_documents} documents",
                    collection.id
                )));
            }
        }

        let document_id = generate_document_id(&request.title);
        let chunks = chunk_text(
            &request.content,
            &document_id,
            collection.settings.chunk_size,
            collection.settings.chunk_overlap,
        );

        let document = DocumentMetadata {
            id: document_id,
            collection_id: collection.id.clone(),
            title: request.title,
            content_type: request.content_type.unwrap_or_default(),
            source_url: request.source_url,
            author: request.author,
            tags: request.tags,
            timestamp: now_nanos(),
            total_chunks: chunks.len() as u32,
            size: request.content.chars().count() as u64,
            is_embedded: false,
            checksum: content_checksum(&request.content),
        };

        self.store.insert_document(&document, &chunks)?;
        self.invalidate_cache(&collection.id);
        tracing::info!(
            collection = %collection.id,
            document = %document.id,
            chunks = document.total_chunks,
            "stored document"
        );
        Ok(document)
    }

    /// Store a document, then embed every chunk (admin)
    ///
    /// `proxy_url` overrides the collection's configured endpoint for this
    /// one run; the stored settings are untouched.
    pub async fn add_document_and_embed(
        &self,
        request: AddDocumentRequest,
        proxy_url: Option<String>,
        caller: &str,
    ) -> Result<DocumentMetadata> {
        let collection_id = request.collection_id.clone();
        let document = self.add_document(request, caller)?;
        let collection = self.manager.get(&collection_id)?;
        self.embed_document(&collection, &document, proxy_url.as_deref())
            .await?;
        self.store
            .get_document(&collection_id, &document.id)?
            .ok_or_else(|| ShoalError::not_found(format!("document '{}'", document.id)))
    }

    /// Embed (or re-embed) a document that is already stored (admin)
    ///
    /// Re-embedding an embedded document first drops all of its vectors,
    /// then runs the pipeline from scratch.
    pub async fn embed_existing_document(
        &self,
        collection_id: &str,
        document_id: &str,
        caller: &str,
    ) -> Result<u32> {
        let collection = self.manager.get(collection_id)?;
        self.manager.require_admin(collection_id, caller)?;
        let document = self
            .store
            .get_document(collection_id, document_id)?
            .ok_or_else(|| {
                ShoalError::not_found(format!(
                    "document '{document_id}' in collection '{collection_id}'"
                ))
            })?;
        self.embed_document(&collection, &document, None).await
    }

    /// Embed every non-embedded document in a collection (admin)
    pub async fn bulk_embed_collection(
        &self,
        collection_id: &str,
        caller: &str,
    ) -> Result<BulkEmbedReport> {
        let collection = self.manager.get(collection_id)?;
        self.manager.require_admin(collection_id, caller)?;

        let mut report = BulkEmbedReport::default();
        for document in self.store.list_documents(collection_id)? {
            if document.is_embedded {
                report.skipped += 1;
                continue;
            }
            match self.embed_document(&collection, &document, None).await {
                Ok(_) => report.embedded += 1,
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(format!("document {}: {e}", document.id));
                }
            }
        }
        Ok(report)
    }

    /// Delete a document with its chunks and vectors (admin)
    pub fn delete_document(
        &self,
        collection_id: &str,
        document_id: &str,
        caller: &str,
    ) -> Result<()> {
        self.manager.get(collection_id)?;
        self.manager.require_admin(collection_id, caller)?;
        self.store.delete_document_cascade(collection_id, document_id)?;
        self.invalidate_cache(collection_id);
        Ok(())
    }

    /// Delete a document's vectors, clearing its embedded flag (admin)
    pub fn delete_document_vectors(
        &self,
        collection_id: &str,
        document_id: &str,
        caller: &str,
    ) -> Result<u32> {
        self.manager.get(collection_id)?;
        self.manager.require_admin(collection_id, caller)?;
        if !self.store.document_exists(collection_id, document_id)? {
            return Err(ShoalError::not_found(format!(
                "document '{document_id}' in collection '{collection_id}'"
            )));
        }
        let removed = self.store.delete_document_vectors(collection_id, document_id)?;
        self.store
            .set_document_embedded(collection_id, document_id, false)?;
        self.invalidate_cache(collection_id);
        Ok(removed)
    }

    /// Insert one pre-computed vector (admin)
    ///
    /// The id must follow the `<document_id>:v:<position>` derivation and
    /// the stored norm must match the embedding.
    pub fn insert_vector(&self, collection_id: &str, vector: Vector, caller: &str) -> Result<()> {
        self.manager.get(collection_id)?;
        self.manager.require_admin(collection_id, caller)?;

        if !vector.id.starts_with(&format!("{}:v:", vector.document_id)) {
            return Err(ShoalError::invalid_input(
                "vector_id",
                "must derive from the document id as <document_id>:v:<position>",
            ));
        }
        let recomputed = l2_norm(&vector.embedding)?;
        let tolerance = 1e-6_f32 * recomputed.max(1.0);
        if (recomputed - vector.norm).abs() > tolerance {
            return Err(ShoalError::invalid_input(
                "norm",
                format!("stored {} does not match recomputed {recomputed}", vector.norm),
            ));
        }

        self.store.insert_vectors(collection_id, &[vector])?;
        self.invalidate_cache(collection_id);
        Ok(())
    }

    /// Delete one vector (admin)
    pub fn delete_vector(&self, collection_id: &str, vector_id: &str, caller: &str) -> Result<()> {
        self.manager.get(collection_id)?;
        self.manager.require_admin(collection_id, caller)?;
        self.store.delete_vector(collection_id, vector_id)?;
        self.invalidate_cache(collection_id);
        Ok(())
    }

    /// The embed phase: batch, validate, commit, or roll everything back
    async fn embed_document(
        &self,
        collection: &Collection,
        document: &DocumentMetadata,
        proxy_url: Option<&str>,
    ) -> Result<u32> {
        let proxy_url = proxy_url.unwrap_or(&collection.settings.proxy_url);
        let _guard = self.acquire_in_progress(&collection.id, &document.id)?;

        // Re-runs start from a clean slate
        let dropped = self
            .store
            .delete_document_vectors(&collection.id, &document.id)?;
        if dropped > 0 {
            self.store
                .set_document_embedded(&collection.id, &document.id, false)?;
            self.invalidate_cache(&collection.id);
        }

        let chunks = self.store.get_document_chunks(&document.id)?;
        if chunks.is_empty() {
            // Nothing to embed: the invariant holds vacuously
            self.store
                .set_document_embedded(&collection.id, &document.id, true)?;
            return Ok(0);
        }

        let batch_size = dynamic_batch_size(document.size as usize, chunks.len());
        let mut expected_dim = self.store.collection_dimensions(&collection.id)?;
        let mut written: Vec<VectorId> = Vec::new();

        tracing::info!(
            collection = %collection.id,
            document = %document.id,
            chunks = chunks.len(),
            batch_size,
            model = %collection.settings.embedding_model,
            "embedding document"
        );

        for (batch_index, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = match self
                .embedder
                .embed(&texts, &collection.settings.embedding_model, proxy_url)
                .await
            {
                Ok(embeddings) => embeddings,
                Err(source) => {
                    self.abort_embed(collection, document, &written, batch_index, &source)?;
                    return Err(ShoalError::Embedding(source));
                }
            };

            match self.validate_batch(collection, batch, &embeddings, &mut expected_dim) {
                Ok(vectors) => {
                    self.store.insert_vectors(&collection.id, &vectors)?;
                    written.extend(vectors.into_iter().map(|v| v.id));
                }
                Err(source) => {
                    self.abort_embed(collection, document, &written, batch_index, &source)?;
                    return Err(ShoalError::Embedding(source));
                }
            }
        }

        self.store
            .set_document_embedded(&collection.id, &document.id, true)?;
        self.invalidate_cache(&collection.id);
        tracing::info!(
            collection = %collection.id,
            document = %document.id,
            vectors = written.len(),
            "document embedded"
        );
        Ok(written.len() as u32)
    }

    /// Turn one embedding batch into validated vector records
    fn validate_batch(
        &self,
        collection: &Collection,
        batch: &[SemanticChunk],
        embeddings: &[Vec<f32>],
        expected_dim: &mut Option<usize>,
    ) -> std::result::Result<Vec<Vector>, ProviderError> {
        if embeddings.len() != batch.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "embedding count mismatch: sent {}, got {}",
                batch.len(),
                embeddings.len()
            )));
        }

        let mut vectors = Vec::with_capacity(batch.len());
        for (chunk, embedding) in batch.iter().zip(embeddings.iter()) {
            let norm = l2_norm(embedding).map_err(|e| {
                ProviderError::InvalidResponse(format!("chunk {}: {e}", chunk.position))
            })?;
            match *expected_dim {
                Some(dim) if dim != embedding.len() => {
                    return Err(ProviderError::InvalidResponse(format!(
                        "chunk {}: dimension {} does not match the collection's {dim}",
                        chunk.position,
                        embedding.len()
                    )));
                }
                Some(_) => {}
                None => *expected_dim = Some(embedding.len()),
            }

            vectors.push(Vector {
                id: vector_id_for(&chunk.document_id, chunk.position),
                document_id: chunk.document_id.clone(),
                chunk_id: chunk.id.clone(),
                embedding: embedding.clone(),
                norm,
                model: collection.settings.embedding_model.clone(),
                created_at: now_nanos(),
            });
        }
        Ok(vectors)
    }

    /// Delete everything this run wrote
    fn abort_embed(
        &self,
        collection: &Collection,
        document: &DocumentMetadata,
        written: &[VectorId],
        batch_index: usize,
        source: &ProviderError,
    ) -> Result<()> {
        tracing::warn!(
            collection = %collection.id,
            document = %document.id,
            batch = batch_index,
            rolled_back = written.len(),
            error = %source,
            "embedding failed, rolling back"
        );
        self.store.delete_vectors_by_ids(&collection.id, written)?;
        self.invalidate_cache(&collection.id);
        Ok(())
    }
}
