//! Regions 3 and 4: vector records, the collection-scoped vector index,
//! and integrity validation

use redb::ReadableTable;

use super::documents::vector_prefix;
use super::keys;
use super::{decode_record, encode_record, scan_prefix, DurableStore};
use super::{CHUNKS_TABLE, DOCUMENTS_TABLE, DOCUMENT_INDEX_TABLE, VECTORS_TABLE, VECTOR_INDEX_TABLE};
use crate::distance::{l2_norm, validate_embedding};
use crate::error::{Result, ShoalError};
use crate::types::Vector;

impl DurableStore {
    /// Store a batch of vectors for one collection in a single commit
    ///
    /// Enforces the collection-wide dimensionality invariant: the first
    /// vector ever inserted fixes the dimension, and later inserts of a
    /// different dimension fail without writing anything. Every vector
    /// must reference an existing document and chunk.
    pub fn insert_vectors(&self, collection_id: &str, batch: &[Vector]) -> Result<u32> {
        if batch.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db().begin_write()?;
        let mut stored = 0u32;
        {
            let mut vectors = write_txn.open_table(VECTORS_TABLE)?;
            let mut vector_index = write_txn.open_table(VECTOR_INDEX_TABLE)?;
            let documents = write_txn.open_table(DOCUMENTS_TABLE)?;
            let chunks = write_txn.open_table(CHUNKS_TABLE)?;

            let mut expected_dim =
                established_dimension(&vectors, &vector_index, collection_id)?;

            for vector in batch {
                validate_embedding(&vector.embedding)?;
                if !vector.norm.is_finite() || vector.norm <= 0.0 {
                    return Err(ShoalError::invalid_input(
                        "norm",
                        format!("must be positive and finite, got {}", vector.norm),
                    ));
                }
                match expected_dim {
                    Some(dim) if dim != vector.embedding.len() => {
                        return Err(ShoalError::invalid_input(
                            "embedding",
                            format!(
                                "dimension mismatch: collection uses {dim}, got {}",
                                vector.embedding.len()
                            ),
                        ));
                    }
                    Some(_) => {}
                    None => expected_dim = Some(vector.embedding.len()),
                }

                let doc_key = keys::encode_pair(collection_id, &vector.document_id);
                if documents.get(doc_key.as_slice())?.is_none() {
                    return Err(ShoalError::not_found(format!(
                        "document '{}' in collection '{collection_id}'",
                        vector.document_id
                    )));
                }
                if chunks.get(vector.chunk_id.as_bytes())?.is_none() {
                    return Err(ShoalError::not_found(format!(
                        "chunk '{}'",
                        vector.chunk_id
                    )));
                }

                let bytes = encode_record(vector)?;
                vectors.insert(vector.id.as_bytes(), bytes.as_slice())?;
                let index_key = keys::encode_pair(collection_id, &vector.id);
                vector_index.insert(index_key.as_slice(), vector.document_id.as_bytes())?;
                stored += 1;
            }
        }
        write_txn.commit()?;
        Ok(stored)
    }

    /// Fetch a vector by id
    pub fn get_vector(&self, vector_id: &str) -> Result<Option<Vector>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(VECTORS_TABLE)?;
        match table.get(vector_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_record(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// All vectors of a collection, in ascending vector-id order
    pub fn get_collection_vectors(&self, collection_id: &str) -> Result<Vec<Vector>> {
        let read_txn = self.db().begin_read()?;
        let vector_index = read_txn.open_table(VECTOR_INDEX_TABLE)?;
        let vectors = read_txn.open_table(VECTORS_TABLE)?;

        let prefix = keys::encode_one(collection_id);
        let mut out = Vec::new();
        for (index_key, _) in scan_prefix(&vector_index, &prefix)? {
            let (_, vector_id) = keys::decode_pair(&index_key)?;
            if let Some(bytes) = vectors.get(vector_id.as_bytes())? {
                out.push(decode_record(bytes.value())?);
            }
        }
        Ok(out)
    }

    /// All vectors of one document
    pub fn get_document_vectors(&self, document_id: &str) -> Result<Vec<Vector>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(VECTORS_TABLE)?;
        let prefix = vector_prefix(document_id);
        let mut out: Vec<Vector> = Vec::new();
        for (_, value) in scan_prefix(&table, prefix.as_bytes())? {
            out.push(decode_record(&value)?);
        }
        out.sort_by_key(|v| {
            v.id
                .rsplit(':')
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .unwrap_or(u32::MAX)
        });
        Ok(out)
    }

    /// Number of vectors in a collection (secondary-index count)
    pub fn vector_count(&self, collection_id: &str) -> Result<u64> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(VECTOR_INDEX_TABLE)?;
        super::count_prefix(&table, &keys::encode_one(collection_id))
    }

    /// Dimensionality established by the collection's first vector
    pub fn collection_dimensions(&self, collection_id: &str) -> Result<Option<usize>> {
        let read_txn = self.db().begin_read()?;
        let vector_index = read_txn.open_table(VECTOR_INDEX_TABLE)?;
        let vectors = read_txn.open_table(VECTORS_TABLE)?;
        established_dimension(&vectors, &vector_index, collection_id)
    }

    /// Delete one vector and its index entry
    pub fn delete_vector(&self, collection_id: &str, vector_id: &str) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        {
            let mut vectors = write_txn.open_table(VECTORS_TABLE)?;
            if vectors.remove(vector_id.as_bytes())?.is_none() {
                return Err(ShoalError::not_found(format!("vector '{vector_id}'")));
            }
            let mut vector_index = write_txn.open_table(VECTOR_INDEX_TABLE)?;
            let index_key = keys::encode_pair(collection_id, vector_id);
            vector_index.remove(index_key.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Delete a set of vectors by id in one commit; missing ids are ignored
    ///
    /// This is the ingestion rollback primitive.
    pub fn delete_vectors_by_ids(&self, collection_id: &str, vector_ids: &[String]) -> Result<u32> {
        if vector_ids.is_empty() {
            return Ok(0);
        }
        let write_txn = self.db().begin_write()?;
        let mut removed = 0u32;
        {
            let mut vectors = write_txn.open_table(VECTORS_TABLE)?;
            let mut vector_index = write_txn.open_table(VECTOR_INDEX_TABLE)?;
            for vector_id in vector_ids {
                if vectors.remove(vector_id.as_bytes())?.is_some() {
                    removed += 1;
                }
                let index_key = keys::encode_pair(collection_id, vector_id);
                vector_index.remove(index_key.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    /// Delete every vector of a document in one commit
    pub fn delete_document_vectors(&self, collection_id: &str, document_id: &str) -> Result<u32> {
        let write_txn = self.db().begin_write()?;
        let mut removed = 0u32;
        {
            let mut vectors = write_txn.open_table(VECTORS_TABLE)?;
            let mut vector_index = write_txn.open_table(VECTOR_INDEX_TABLE)?;
            let prefix = vector_prefix(document_id);
            for (vector_key, _) in scan_prefix(&vectors, prefix.as_bytes())? {
                vectors.remove(vector_key.as_slice())?;
                let vector_id = String::from_utf8(vector_key)
                    .map_err(|_| ShoalError::CorruptState("non-UTF-8 vector id".into()))?;
                let index_key = keys::encode_pair(collection_id, &vector_id);
                vector_index.remove(index_key.as_slice())?;
                removed += 1;
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    /// Check the vector invariants of a collection, optionally repairing
    ///
    /// Returns one message per issue found (before repair). With `repair`,
    /// orphaned index entries are dropped, index entries missing for stored
    /// vectors are recreated, and documents whose vector set no longer
    /// matches `total_chunks` lose their embedded flag.
    pub fn validate_collection_vectors(
        &self,
        collection_id: &str,
        repair: bool,
    ) -> Result<Vec<String>> {
        let mut issues = Vec::new();

        let write_txn = self.db().begin_write()?;
        {
            let mut vectors = write_txn.open_table(VECTORS_TABLE)?;
            let mut vector_index = write_txn.open_table(VECTOR_INDEX_TABLE)?;
            let mut documents = write_txn.open_table(DOCUMENTS_TABLE)?;
            let document_index = write_txn.open_table(DOCUMENT_INDEX_TABLE)?;
            let chunks = write_txn.open_table(CHUNKS_TABLE)?;

            let prefix = keys::encode_one(collection_id);
            let mut established: Option<usize> = None;

            // Index -> record direction
            for (index_key, indexed_doc) in scan_prefix(&vector_index, &prefix)? {
                let (_, vector_id) = keys::decode_pair(&index_key)?;
                let record = match vectors.get(vector_id.as_bytes())? {
                    Some(bytes) => Some(decode_record::<Vector>(bytes.value())?),
                    None => None,
                };
                let Some(vector) = record else {
                    issues.push(format!("index entry for missing vector '{vector_id}'"));
                    if repair {
                        vector_index.remove(index_key.as_slice())?;
                    }
                    continue;
                };

                if vector.document_id.as_bytes() != indexed_doc.as_slice() {
                    issues.push(format!(
                        "index entry for '{vector_id}' names the wrong document"
                    ));
                }

                match established {
                    Some(dim) if dim != vector.embedding.len() => {
                        issues.push(format!(
                            "vector '{vector_id}' has dimension {}, collection uses {dim}",
                            vector.embedding.len()
                        ));
                    }
                    Some(_) => {}
                    None => established = Some(vector.embedding.len()),
                }

                if let Ok(recomputed) = l2_norm(&vector.embedding) {
                    let tolerance = 1e-6_f32 * recomputed.max(1.0);
                    if (recomputed - vector.norm).abs() > tolerance {
                        issues.push(format!(
                            "vector '{vector_id}' stored norm {} differs from recomputed {recomputed}",
                            vector.norm
                        ));
                    }
                } else {
                    issues.push(format!("vector '{vector_id}' has an invalid embedding"));
                }

                if chunks.get(vector.chunk_id.as_bytes())?.is_none() {
                    issues.push(format!(
                        "vector '{vector_id}' references missing chunk '{}'",
                        vector.chunk_id
                    ));
                }

                let doc_key = keys::encode_pair(collection_id, &vector.document_id);
                if documents.get(doc_key.as_slice())?.is_none() {
                    issues.push(format!(
                        "vector '{vector_id}' references missing document '{}'",
                        vector.document_id
                    ));
                    if repair {
                        vectors.remove(vector_id.as_bytes())?;
                        vector_index.remove(index_key.as_slice())?;
                    }
                }
            }

            // Record -> index direction, plus the embedded-flag invariant
            for (doc_key, _) in scan_prefix(&document_index, &prefix)? {
                let (_, document_id) = keys::decode_pair(&doc_key)?;

                let mut vector_count = 0u32;
                let doc_vector_prefix = vector_prefix(&document_id);
                for (vector_key, _) in scan_prefix(&vectors, doc_vector_prefix.as_bytes())? {
                    vector_count += 1;
                    let vector_id = String::from_utf8(vector_key)
                        .map_err(|_| ShoalError::CorruptState("non-UTF-8 vector id".into()))?;
                    let index_key = keys::encode_pair(collection_id, &vector_id);
                    if vector_index.get(index_key.as_slice())?.is_none() {
                        issues.push(format!("vector '{vector_id}' missing from the index"));
                        if repair {
                            vector_index
                                .insert(index_key.as_slice(), document_id.as_bytes())?;
                        }
                    }
                }

                let document: Option<crate::types::DocumentMetadata> =
                    match documents.get(doc_key.as_slice())? {
                        Some(bytes) => Some(decode_record(bytes.value())?),
                        None => None,
                    };
                if let Some(document) = document {
                    if document.is_embedded && vector_count != document.total_chunks {
                        issues.push(format!(
                            "document '{document_id}' is flagged embedded but has {vector_count} of {} vectors",
                            document.total_chunks
                        ));
                        if repair {
                            let mut fixed = document;
                            fixed.is_embedded = false;
                            let bytes = encode_record(&fixed)?;
                            documents.insert(doc_key.as_slice(), bytes.as_slice())?;
                        }
                    }
                }
            }
        }
        write_txn.commit()?;

        if !issues.is_empty() {
            tracing::warn!(
                collection = collection_id,
                issues = issues.len(),
                repaired = repair,
                "vector validation found inconsistencies"
            );
        }
        Ok(issues)
    }
}

fn established_dimension<V, I>(
    vectors: &V,
    vector_index: &I,
    collection_id: &str,
) -> Result<Option<usize>>
where
    V: ReadableTable<&'static [u8], &'static [u8]>,
    I: ReadableTable<&'static [u8], &'static [u8]>,
{
    let prefix = keys::encode_one(collection_id);
    for item in vector_index.range::<&[u8]>(prefix.as_slice()..)? {
        let (key, _) = item?;
        if !key.value().starts_with(prefix.as_slice()) {
            break;
        }
        let (_, vector_id) = keys::decode_pair(key.value())?;
        if let Some(bytes) = vectors.get(vector_id.as_bytes())? {
            let vector: Vector = decode_record(bytes.value())?;
            return Ok(Some(vector.embedding.len()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use crate::error::ShoalError;
    use crate::store::DurableStore;
    use crate::types::{chunk_id_for, vector_id_for, DocumentMetadata, SemanticChunk, Vector};
    use tempfile::tempdir;

    fn seed_document(store: &DurableStore, collection_id: &str, document_id: &str, chunks: u32) {
        let chunk_records: Vec<_> = (0..chunks)
            .map(|p| SemanticChunk {
                id: chunk_id_for(document_id, p),
                document_id: document_id.to_string(),
                text: format!("chunk {p}"),
                position: p,
                char_start: 0,
                char_end: 7,
                token_count: None,
            })
            .collect();
        let doc = DocumentMetadata {
            id: document_id.to_string(),
            collection_id: collection_id.to_string(),
            title: "T".to_string(),
            total_chunks: chunks,
            ..Default::default()
        };
        store.insert_document(&doc, &chunk_records).unwrap();
    }

    fn vector(document_id: &str, position: u32, embedding: Vec<f32>) -> Vector {
        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        Vector {
            id: vector_id_for(document_id, position),
            document_id: document_id.to_string(),
            chunk_id: chunk_id_for(document_id, position),
            embedding,
            norm,
            model: "test-model".to_string(),
            created_at: 1,
        }
    }

    #[test]
    fn batch_insert_and_collection_scan() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path().join("t.redb")).unwrap();
        seed_document(&store, "c1", "doc_a", 3);

        let batch = vec![
            vector("doc_a", 0, vec![1.0, 0.0]),
            vector("doc_a", 1, vec![0.0, 1.0]),
            vector("doc_a", 2, vec![0.5, 0.5]),
        ];
        assert_eq!(store.insert_vectors("c1", &batch).unwrap(), 3);
        assert_eq!(store.vector_count("c1").unwrap(), 3);
        assert_eq!(store.collection_dimensions("c1").unwrap(), Some(2));

        let all = store.get_collection_vectors("c1").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn dimension_mismatch_fails_without_partial_writes() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path().join("t.redb")).unwrap();
        seed_document(&store, "c1", "doc_a", 3);

        store
            .insert_vectors("c1", &[vector("doc_a", 0, vec![1.0, 0.0])])
            .unwrap();

        let bad_batch = vec![
            vector("doc_a", 1, vec![0.0, 1.0]),
            vector("doc_a", 2, vec![0.0, 1.0, 2.0]),
        ];
        let err = store.insert_vectors("c1", &bad_batch).unwrap_err();
        assert!(matches!(err, ShoalError::InvalidInput { .. }));

        // The whole batch rolled back, including its valid first entry
        assert_eq!(store.vector_count("c1").unwrap(), 1);
    }

    #[test]
    fn zero_norm_vector_is_rejected() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path().join("t.redb")).unwrap();
        seed_document(&store, "c1", "doc_a", 1);

        let mut v = vector("doc_a", 0, vec![0.0, 0.0]);
        v.norm = 0.0;
        assert!(store.insert_vectors("c1", &[v]).is_err());
    }

    #[test]
    fn document_vector_deletion_updates_both_regions() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path().join("t.redb")).unwrap();
        seed_document(&store, "c1", "doc_a", 2);
        seed_document(&store, "c1", "doc_b", 1);

        store
            .insert_vectors(
                "c1",
                &[
                    vector("doc_a", 0, vec![1.0, 0.0]),
                    vector("doc_a", 1, vec![0.0, 1.0]),
                    vector("doc_b", 0, vec![0.5, 0.5]),
                ],
            )
            .unwrap();

        assert_eq!(store.delete_document_vectors("c1", "doc_a").unwrap(), 2);
        assert_eq!(store.vector_count("c1").unwrap(), 1);
        assert!(store.get_vector("doc_a:v:0").unwrap().is_none());
        assert!(store.get_vector("doc_b:v:0").unwrap().is_some());
    }

    #[test]
    fn validation_repairs_orphaned_index_entries() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path().join("t.redb")).unwrap();
        seed_document(&store, "c1", "doc_a", 1);
        store
            .insert_vectors("c1", &[vector("doc_a", 0, vec![1.0, 0.0])])
            .unwrap();

        // Remove the record but not the index entry, then validate
        {
            let txn = store.db().begin_write().unwrap();
            {
                let mut vectors = txn.open_table(crate::store::VECTORS_TABLE).unwrap();
                vectors.remove("doc_a:v:0".as_bytes()).unwrap();
            }
            txn.commit().unwrap();
        }

        let issues = store.validate_collection_vectors("c1", true).unwrap();
        assert!(!issues.is_empty());
        let issues_after = store.validate_collection_vectors("c1", false).unwrap();
        assert!(issues_after.is_empty(), "repair should have settled: {issues_after:?}");
    }
}
