//! Regions 1, 2, 5, 6: document records, chunk records, and their indexes

use redb::ReadableTable;

use super::keys;
use super::{count_prefix, decode_record, encode_record, scan_prefix, DurableStore};
use super::{
    CHUNKS_TABLE, CHUNK_INDEX_TABLE, DOCUMENTS_TABLE, DOCUMENT_INDEX_TABLE, VECTORS_TABLE,
    VECTOR_INDEX_TABLE,
};
use crate::error::{Result, ShoalError};
use crate::types::{DocumentMetadata, SemanticChunk};

/// Byte prefix shared by all chunk ids of a document (`<did>:c:`)
pub(crate) fn chunk_prefix(document_id: &str) -> String {
    format!("{document_id}:c:")
}

/// Byte prefix shared by all vector ids of a document (`<did>:v:`)
pub(crate) fn vector_prefix(document_id: &str) -> String {
    format!("{document_id}:v:")
}

impl DurableStore {
    /// Store a document with all of its chunks and index entries in one
    /// commit
    pub fn insert_document(
        &self,
        document: &DocumentMetadata,
        chunks: &[SemanticChunk],
    ) -> Result<()> {
        let doc_key = keys::encode_pair(&document.collection_id, &document.id);

        let write_txn = self.db().begin_write()?;
        {
            let mut documents = write_txn.open_table(DOCUMENTS_TABLE)?;
            if documents.get(doc_key.as_slice())?.is_some() {
                return Err(ShoalError::AlreadyExists(format!(
                    "document '{}'",
                    document.id
                )));
            }
            let doc_bytes = encode_record(document)?;
            documents.insert(doc_key.as_slice(), doc_bytes.as_slice())?;

            let mut chunk_table = write_txn.open_table(CHUNKS_TABLE)?;
            let mut chunk_index = write_txn.open_table(CHUNK_INDEX_TABLE)?;
            for chunk in chunks {
                let chunk_bytes = encode_record(chunk)?;
                chunk_table.insert(chunk.id.as_bytes(), chunk_bytes.as_slice())?;
                chunk_index.insert(chunk.id.as_bytes(), document.id.as_bytes())?;
            }

            let mut document_index = write_txn.open_table(DOCUMENT_INDEX_TABLE)?;
            document_index.insert(doc_key.as_slice(), [].as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Fetch a document record
    pub fn get_document(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentMetadata>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;
        let key = keys::encode_pair(collection_id, document_id);
        match table.get(key.as_slice())? {
            Some(bytes) => Ok(Some(decode_record(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// True if the document exists in the collection
    pub fn document_exists(&self, collection_id: &str, document_id: &str) -> Result<bool> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;
        let key = keys::encode_pair(collection_id, document_id);
        Ok(table.get(key.as_slice())?.is_some())
    }

    /// All documents of a collection, ascending by document id
    pub fn list_documents(&self, collection_id: &str) -> Result<Vec<DocumentMetadata>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;
        let prefix = keys::encode_one(collection_id);
        let mut out = Vec::new();
        for (_, value) in scan_prefix(&table, &prefix)? {
            out.push(decode_record(&value)?);
        }
        Ok(out)
    }

    /// Number of documents in a collection (secondary-index count)
    pub fn document_count(&self, collection_id: &str) -> Result<u64> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(DOCUMENT_INDEX_TABLE)?;
        count_prefix(&table, &keys::encode_one(collection_id))
    }

    /// Flip the embedded flag on a document record
    pub fn set_document_embedded(
        &self,
        collection_id: &str,
        document_id: &str,
        embedded: bool,
    ) -> Result<()> {
        let key = keys::encode_pair(collection_id, document_id);
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(DOCUMENTS_TABLE)?;
            let mut document: DocumentMetadata = match table.get(key.as_slice())? {
                Some(bytes) => decode_record(bytes.value())?,
                None => {
                    return Err(ShoalError::not_found(format!(
                        "document '{document_id}' in collection '{collection_id}'"
                    )))
                }
            };
            document.is_embedded = embedded;
            let bytes = encode_record(&document)?;
            table.insert(key.as_slice(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All chunks of a document in ascending position order
    pub fn get_document_chunks(&self, document_id: &str) -> Result<Vec<SemanticChunk>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(CHUNKS_TABLE)?;
        let prefix = chunk_prefix(document_id);
        let mut chunks: Vec<SemanticChunk> = Vec::new();
        for (_, value) in scan_prefix(&table, prefix.as_bytes())? {
            chunks.push(decode_record(&value)?);
        }
        // Key order is lexicographic; positions are decimal, so re-sort
        chunks.sort_by_key(|c| c.position);
        Ok(chunks)
    }

    /// Fetch a single chunk by id
    pub fn get_chunk(&self, chunk_id: &str) -> Result<Option<SemanticChunk>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(CHUNKS_TABLE)?;
        match table.get(chunk_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_record(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Resolve the owning document of a chunk through the chunk index
    pub fn chunk_document(&self, chunk_id: &str) -> Result<Option<String>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(CHUNK_INDEX_TABLE)?;
        match table.get(chunk_id.as_bytes())? {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes.value().to_vec())
                    .map_err(|_| ShoalError::CorruptState("non-UTF-8 chunk index".into()))?,
            )),
            None => Ok(None),
        }
    }

    /// Delete a document, its chunks, its vectors, and every index entry,
    /// in one commit
    pub fn delete_document_cascade(&self, collection_id: &str, document_id: &str) -> Result<()> {
        let doc_key = keys::encode_pair(collection_id, document_id);

        let write_txn = self.db().begin_write()?;
        {
            let mut documents = write_txn.open_table(DOCUMENTS_TABLE)?;
            if documents.remove(doc_key.as_slice())?.is_none() {
                return Err(ShoalError::not_found(format!(
                    "document '{document_id}' in collection '{collection_id}'"
                )));
            }

            let mut document_index = write_txn.open_table(DOCUMENT_INDEX_TABLE)?;
            document_index.remove(doc_key.as_slice())?;

            let mut chunk_table = write_txn.open_table(CHUNKS_TABLE)?;
            let mut chunk_index = write_txn.open_table(CHUNK_INDEX_TABLE)?;
            let prefix = chunk_prefix(document_id);
            for (chunk_key, _) in scan_prefix(&chunk_table, prefix.as_bytes())? {
                chunk_table.remove(chunk_key.as_slice())?;
                chunk_index.remove(chunk_key.as_slice())?;
            }

            let mut vectors = write_txn.open_table(VECTORS_TABLE)?;
            let mut vector_index = write_txn.open_table(VECTOR_INDEX_TABLE)?;
            let prefix = vector_prefix(document_id);
            for (vector_key, _) in scan_prefix(&vectors, prefix.as_bytes())? {
                vectors.remove(vector_key.as_slice())?;
                let vector_id = String::from_utf8(vector_key)
                    .map_err(|_| ShoalError::CorruptState("non-UTF-8 vector id".into()))?;
                let index_key = keys::encode_pair(collection_id, &vector_id);
                vector_index.remove(index_key.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}
