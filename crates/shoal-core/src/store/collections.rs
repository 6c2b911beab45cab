//! Region 0 operations: collection records and the collection-wide cascade

use redb::ReadableTable;

use super::documents::{chunk_prefix, vector_prefix};
use super::keys;
use super::{decode_record, encode_record, scan_prefix, DurableStore};
use super::{
    CHUNKS_TABLE, CHUNK_INDEX_TABLE, COLLECTIONS_TABLE, DOCUMENTS_TABLE, DOCUMENT_INDEX_TABLE,
    VECTORS_TABLE, VECTOR_INDEX_TABLE,
};
use crate::error::{Result, ShoalError};
use crate::types::Collection;

impl DurableStore {
    /// Insert a new collection record; fails if the id is taken
    pub fn create_collection(&self, collection: &Collection) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(COLLECTIONS_TABLE)?;
            if table.get(collection.id.as_bytes())?.is_some() {
                return Err(ShoalError::AlreadyExists(format!(
                    "collection '{}'",
                    collection.id
                )));
            }
            let bytes = encode_record(collection)?;
            table.insert(collection.id.as_bytes(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Overwrite an existing collection record (settings/metadata updates)
    pub fn put_collection(&self, collection: &Collection) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(COLLECTIONS_TABLE)?;
            let bytes = encode_record(collection)?;
            table.insert(collection.id.as_bytes(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Fetch a collection record
    pub fn get_collection(&self, collection_id: &str) -> Result<Option<Collection>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(COLLECTIONS_TABLE)?;
        match table.get(collection_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_record(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// True if a collection with this id exists
    pub fn collection_exists(&self, collection_id: &str) -> Result<bool> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(COLLECTIONS_TABLE)?;
        Ok(table.get(collection_id.as_bytes())?.is_some())
    }

    /// All collections in ascending id order
    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(COLLECTIONS_TABLE)?;
        let mut out = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            out.push(decode_record(value.value())?);
        }
        Ok(out)
    }

    /// Delete a collection and everything it owns, in one commit
    ///
    /// Cascades across all seven regions: documents, chunks, vectors, and
    /// every secondary-index entry scoped to the collection.
    pub fn delete_collection_cascade(&self, collection_id: &str) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        {
            let mut collections = write_txn.open_table(COLLECTIONS_TABLE)?;
            if collections.remove(collection_id.as_bytes())?.is_none() {
                return Err(ShoalError::not_found(format!(
                    "collection '{collection_id}'"
                )));
            }

            let mut documents = write_txn.open_table(DOCUMENTS_TABLE)?;
            let mut chunks = write_txn.open_table(CHUNKS_TABLE)?;
            let mut vectors = write_txn.open_table(VECTORS_TABLE)?;
            let mut vector_index = write_txn.open_table(VECTOR_INDEX_TABLE)?;
            let mut chunk_index = write_txn.open_table(CHUNK_INDEX_TABLE)?;
            let mut document_index = write_txn.open_table(DOCUMENT_INDEX_TABLE)?;

            let prefix = keys::encode_one(collection_id);

            // Documents with their chunks and vectors
            for (doc_key, _) in scan_prefix(&document_index, &prefix)? {
                let (_, document_id) = keys::decode_pair(&doc_key)?;

                let doc_chunks = chunk_prefix(&document_id);
                for (chunk_key, _) in scan_prefix(&chunks, doc_chunks.as_bytes())? {
                    chunks.remove(chunk_key.as_slice())?;
                    chunk_index.remove(chunk_key.as_slice())?;
                }

                let doc_vectors = vector_prefix(&document_id);
                for (vector_key, _) in scan_prefix(&vectors, doc_vectors.as_bytes())? {
                    vectors.remove(vector_key.as_slice())?;
                }

                documents.remove(doc_key.as_slice())?;
                document_index.remove(doc_key.as_slice())?;
            }

            // Whatever the vector index still names for this collection
            for (index_key, _) in scan_prefix(&vector_index, &prefix)? {
                let (_, vector_id) = keys::decode_pair(&index_key)?;
                vectors.remove(vector_id.as_bytes())?;
                vector_index.remove(index_key.as_slice())?;
            }
        }
        write_txn.commit()?;
        tracing::info!(collection = collection_id, "deleted collection cascade");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ShoalError;
    use crate::store::DurableStore;
    use crate::types::{Collection, CollectionSettings};
    use tempfile::tempdir;

    fn sample(id: &str) -> Collection {
        Collection {
            id: id.to_string(),
            name: format!("{id} name"),
            description: None,
            created_at: 1,
            updated_at: 1,
            genesis_admin: "alice".to_string(),
            admins: vec!["alice".to_string()],
            settings: CollectionSettings::default(),
        }
    }

    #[test]
    fn create_get_list_round_trip() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path().join("t.redb")).unwrap();

        store.create_collection(&sample("beta")).unwrap();
        store.create_collection(&sample("alpha")).unwrap();

        let got = store.get_collection("alpha").unwrap().unwrap();
        assert_eq!(got.name, "alpha name");
        assert_eq!(got.genesis_admin, "alice");

        let all = store.list_collections().unwrap();
        assert_eq!(all.len(), 2);
        // Ascending id order out of the region scan
        assert_eq!(all[0].id, "alpha");
        assert_eq!(all[1].id, "beta");
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path().join("t.redb")).unwrap();

        store.create_collection(&sample("c1")).unwrap();
        let err = store.create_collection(&sample("c1")).unwrap_err();
        assert!(matches!(err, ShoalError::AlreadyExists(_)));
    }

    #[test]
    fn delete_of_missing_collection_is_not_found() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path().join("t.redb")).unwrap();
        assert!(matches!(
            store.delete_collection_cascade("nope"),
            Err(ShoalError::NotFound(_))
        ));
    }
}
