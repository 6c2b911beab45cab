//! Durable storage: typed logical regions over a redb database
//!
//! Each region from the layout contract maps to one ordered table:
//!
//! | Region | Table            | Key                          | Value            |
//! |--------|------------------|------------------------------|------------------|
//! | 0      | `collections`    | collection_id                | `Collection`     |
//! | 1      | `documents`      | (collection_id, document_id) | `DocumentMetadata` |
//! | 2      | `chunks`         | chunk_id                     | `SemanticChunk`  |
//! | 3      | `vectors`        | vector_id                    | `Vector`         |
//! | 4      | `vector_index`   | (collection_id, vector_id)   | document_id      |
//! | 5      | `chunk_index`    | chunk_id                     | document_id      |
//! | 6      | `document_index` | (collection_id, document_id) | ()               |
//!
//! Composite keys use the length-prefixed encoding in [`keys`]; values use
//! bincode. Every public mutating operation runs inside a single write
//! transaction, so an operation either commits all of its region writes or
//! none of them. Table names plus the key encoding form the upgrade
//! compatibility contract; the `meta` table carries a schema stamp so that
//! an incompatible layout is refused instead of misread.

pub(crate) mod keys;

mod collections;
mod documents;
mod vectors;

use bincode::config;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, ShoalError};
use crate::types::StorageStats;

// Region 0
pub(crate) const COLLECTIONS_TABLE: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("collections");
// Region 1
pub(crate) const DOCUMENTS_TABLE: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("documents");
// Region 2
pub(crate) const CHUNKS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("chunks");
// Region 3
pub(crate) const VECTORS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("vectors");
// Region 4
pub(crate) const VECTOR_INDEX_TABLE: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("vector_index");
// Region 5
pub(crate) const CHUNK_INDEX_TABLE: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("chunk_index");
// Region 6
pub(crate) const DOCUMENT_INDEX_TABLE: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("document_index");

const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("meta");

const SCHEMA_VERSION_KEY: &str = "schema_version";
const SCHEMA_VERSION: &str = "1";

// Database handles are shared across store instances opened on the same
// path, matching the one-file-one-database rule redb enforces.
static DB_POOL: Lazy<Mutex<HashMap<PathBuf, Arc<Database>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Handle over the durable regions
///
/// Cloning is cheap; all clones share one underlying database.
#[derive(Clone)]
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Create or open the durable regions at `path`
    ///
    /// A freshly created database is stamped with the current schema
    /// version; opening a database stamped with a different version fails
    /// with `CorruptState` (migrations are explicit, never implicit).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let path_buf = path_ref
            .canonicalize()
            .unwrap_or_else(|_| path_ref.to_path_buf());

        let db = {
            let mut pool = DB_POOL.lock();
            if let Some(existing) = pool.get(&path_buf) {
                Arc::clone(existing)
            } else {
                let new_db = Arc::new(Database::create(&path_buf)?);
                pool.insert(path_buf, Arc::clone(&new_db));
                new_db
            }
        };

        let store = Self { db };
        store.init_regions()?;
        Ok(store)
    }

    fn init_regions(&self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(COLLECTIONS_TABLE)?;
            let _ = write_txn.open_table(DOCUMENTS_TABLE)?;
            let _ = write_txn.open_table(CHUNKS_TABLE)?;
            let _ = write_txn.open_table(VECTORS_TABLE)?;
            let _ = write_txn.open_table(VECTOR_INDEX_TABLE)?;
            let _ = write_txn.open_table(CHUNK_INDEX_TABLE)?;
            let _ = write_txn.open_table(DOCUMENT_INDEX_TABLE)?;

            let mut meta = write_txn.open_table(META_TABLE)?;
            let existing = meta.get(SCHEMA_VERSION_KEY)?.map(|stamp| stamp.value().to_string());
            match existing {
                Some(found) if found != SCHEMA_VERSION => {
                    return Err(ShoalError::CorruptState(format!(
                        "schema version mismatch: found {found}, expected {SCHEMA_VERSION}"
                    )));
                }
                Some(_) => {}
                None => {
                    meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)?;
                    tracing::info!(version = SCHEMA_VERSION, "stamped new durable store");
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    /// Entry counts for the primary regions
    pub fn storage_stats(&self) -> Result<StorageStats> {
        let read_txn = self.db.begin_read()?;
        Ok(StorageStats {
            collections: read_txn.open_table(COLLECTIONS_TABLE)?.len()?,
            documents: read_txn.open_table(DOCUMENTS_TABLE)?.len()?,
            chunks: read_txn.open_table(CHUNKS_TABLE)?.len()?,
            vectors: read_txn.open_table(VECTORS_TABLE)?.len()?,
        })
    }
}

/// Serialize a record for a region value
pub(crate) fn encode_record<T: bincode::Encode>(value: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(value, config::standard())
        .map_err(|e| ShoalError::CorruptState(format!("encode failed: {e}")))
}

/// Deserialize a region value; failures are fatal for the affected key
pub(crate) fn decode_record<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::decode_from_slice(bytes, config::standard())
        .map_err(|e| ShoalError::CorruptState(format!("decode failed: {e}")))?;
    Ok(value)
}

/// Collect every `(key, value)` pair whose key starts with `prefix`
///
/// Keys with a common prefix are contiguous under byte comparison, so the
/// scan stops at the first non-matching key.
pub(crate) fn scan_prefix<T>(table: &T, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>
where
    T: redb::ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut out = Vec::new();
    for item in table.range::<&[u8]>(prefix..)? {
        let (key, value) = item?;
        if !key.value().starts_with(prefix) {
            break;
        }
        out.push((key.value().to_vec(), value.value().to_vec()));
    }
    Ok(out)
}

/// Count entries whose key starts with `prefix`
pub(crate) fn count_prefix<T>(table: &T, prefix: &[u8]) -> Result<u64>
where
    T: redb::ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut count = 0;
    for item in table.range::<&[u8]>(prefix..)? {
        let (key, _) = item?;
        if !key.value().starts_with(prefix) {
            break;
        }
        count += 1;
    }
    Ok(count)
}
