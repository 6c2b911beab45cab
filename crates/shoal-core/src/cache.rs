//! Bounded LRU cache of per-collection vector sets
//!
//! Entries hold shared, read-only clones of vectors resolved from the
//! durable store, plus the transient centroid index once one has been
//! built. The cache is bounded three ways: entry count, estimated bytes,
//! and TTL. Every write that touches a collection invalidates its entry
//! before the operation returns, so a fresh read repopulates from the
//! store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::index::CentroidIndex;
use crate::types::{now_nanos, CacheStats, CollectionId, Vector};

/// Default bound on cached collections
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
/// Default bound on aggregate cache memory (100 MiB)
pub const DEFAULT_MAX_BYTES: u64 = 100 * 1024 * 1024;
/// Default entry TTL (24 hours)
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache bounds
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Maximum number of cached collections
    pub max_entries: usize,
    /// Maximum aggregate estimated bytes
    pub max_bytes: u64,
    /// Entry lifetime measured from insertion
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
            ttl: DEFAULT_TTL,
        }
    }
}

struct CacheEntry {
    vectors: Arc<Vec<Vector>>,
    index: Option<Arc<CentroidIndex>>,
    inserted_at: u64,
    last_access: u64,
    bytes: u64,
}

/// Bounded LRU vector cache keyed by collection
pub struct VectorCache {
    config: CacheConfig,
    entries: HashMap<CollectionId, CacheEntry>,
    total_bytes: u64,
}

/// Estimated footprint of one entry: per vector, the embedding payload
/// plus a fixed 128-byte overhead for ids and bookkeeping
fn entry_bytes(vectors: &[Vector]) -> u64 {
    let dim = vectors.first().map(|v| v.embedding.len()).unwrap_or(0) as u64;
    vectors.len() as u64 * (dim * 4 + 128)
}

impl VectorCache {
    /// Cache with default bounds
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Cache with explicit bounds
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            total_bytes: 0,
        }
    }

    /// Fetch a fresh entry's vectors, updating its access time
    pub fn get(&mut self, collection_id: &str) -> Option<Arc<Vec<Vector>>> {
        self.get_at(collection_id, now_nanos())
    }

    /// Fetch the centroid index cached with an entry, if any
    pub fn get_index(&mut self, collection_id: &str) -> Option<Arc<CentroidIndex>> {
        self.get_index_at(collection_id, now_nanos())
    }

    /// Cache a collection's vectors; returns false when the entry alone
    /// would exceed the byte bound (callers fall back to store reads)
    pub fn insert(&mut self, collection_id: &str, vectors: Arc<Vec<Vector>>) -> bool {
        self.insert_at(collection_id, vectors, now_nanos())
    }

    /// Attach a freshly built centroid index to an existing entry
    pub fn attach_index(&mut self, collection_id: &str, index: Arc<CentroidIndex>) {
        if let Some(entry) = self.entries.get_mut(collection_id) {
            entry.index = Some(index);
        }
    }

    /// Drop one collection's entry
    pub fn invalidate(&mut self, collection_id: &str) {
        if let Some(entry) = self.entries.remove(collection_id) {
            self.total_bytes = self.total_bytes.saturating_sub(entry.bytes);
        }
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    /// Drop all expired entries; returns how many were removed
    pub fn cleanup(&mut self) -> u32 {
        self.cleanup_at(now_nanos())
    }

    /// Occupancy snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            total_memory_bytes: self.total_bytes,
            max_memory_bytes: self.config.max_bytes,
            max_entries: self.config.max_entries,
            memory_usage_percent: if self.config.max_bytes == 0 {
                0
            } else {
                (self.total_bytes as f64 / self.config.max_bytes as f64 * 100.0) as u32
            },
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: u64) -> bool {
        now.saturating_sub(entry.inserted_at) > self.config.ttl.as_nanos() as u64
    }

    fn get_at(&mut self, collection_id: &str, now: u64) -> Option<Arc<Vec<Vector>>> {
        let expired = match self.entries.get(collection_id) {
            Some(entry) => self.is_expired(entry, now),
            None => return None,
        };
        if expired {
            self.invalidate(collection_id);
            return None;
        }
        let entry = self.entries.get_mut(collection_id)?;
        entry.last_access = now;
        Some(Arc::clone(&entry.vectors))
    }

    fn get_index_at(&mut self, collection_id: &str, now: u64) -> Option<Arc<CentroidIndex>> {
        let expired = match self.entries.get(collection_id) {
            Some(entry) => self.is_expired(entry, now),
            None => return None,
        };
        if expired {
            self.invalidate(collection_id);
            return None;
        }
        let entry = self.entries.get_mut(collection_id)?;
        entry.last_access = now;
        entry.index.as_ref().map(Arc::clone)
    }

    fn insert_at(&mut self, collection_id: &str, vectors: Arc<Vec<Vector>>, now: u64) -> bool {
        let bytes = entry_bytes(&vectors);
        if bytes > self.config.max_bytes {
            tracing::debug!(
                collection = collection_id,
                bytes,
                "entry exceeds the cache byte bound, refusing to cache"
            );
            return false;
        }

        self.invalidate(collection_id);

        // Evict least-recently-used entries until the new one fits
        while self.entries.len() + 1 > self.config.max_entries
            || self.total_bytes + bytes > self.config.max_bytes
        {
            let Some(victim) = self.lru_victim() else { break };
            self.invalidate(&victim);
        }

        self.entries.insert(
            collection_id.to_string(),
            CacheEntry {
                vectors,
                index: None,
                inserted_at: now,
                last_access: now,
                bytes,
            },
        );
        self.total_bytes += bytes;
        true
    }

    fn cleanup_at(&mut self, now: u64) -> u32 {
        let expired: Vec<CollectionId> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(id, _)| id.clone())
            .collect();
        let count = expired.len() as u32;
        for id in expired {
            self.invalidate(&id);
        }
        count
    }

    /// Entry with the smallest access time; id order breaks ties so
    /// eviction is deterministic
    fn lru_victim(&self) -> Option<CollectionId> {
        self.entries
            .iter()
            .min_by(|a, b| {
                a.1.last_access
                    .cmp(&b.1.last_access)
                    .then_with(|| a.0.cmp(b.0))
            })
            .map(|(id, _)| id.clone())
    }
}

impl Default for VectorCache {
    fn default() -> Self {
        Self::new()
    }
}
