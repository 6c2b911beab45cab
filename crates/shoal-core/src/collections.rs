//! Collection lifecycle, settings, and the two-tier admin ACL
//!
//! Every collection has exactly one genesis admin at all times. Genesis
//! authority derives from the named field, never from membership in the
//! admin list, and can only move via an explicit transfer.

use crate::error::{Result, ShoalError};
use crate::store::DurableStore;
use crate::types::{
    now_nanos, validate_collection_id, validate_settings, AdminLevel, Collection,
    CollectionSettings, CollectionStats, CollectionWithStats, CreateCollectionRequest, Principal,
};

/// Manager over the collection region and its ACL rules
#[derive(Clone)]
pub struct CollectionManager {
    store: DurableStore,
}

impl CollectionManager {
    /// Manager over the given store
    pub fn new(store: DurableStore) -> Self {
        Self { store }
    }

    /// Create a collection; the caller becomes its genesis admin
    pub fn create(&self, request: CreateCollectionRequest, caller: &str) -> Result<Collection> {
        validate_collection_id(&request.id)?;
        let settings = request.settings.unwrap_or_default();
        validate_settings(&settings)?;

        if request.name.trim().is_empty() || request.name.len() > 100 {
            return Err(ShoalError::invalid_input(
                "name",
                "must be 1-100 characters",
            ));
        }

        let now = now_nanos();
        let collection = Collection {
            id: request.id,
            name: request.name,
            description: request.description,
            created_at: now,
            updated_at: now,
            genesis_admin: caller.to_string(),
            admins: vec![caller.to_string()],
            settings,
        };

        self.store.create_collection(&collection)?;
        tracing::info!(collection = %collection.id, genesis = caller, "created collection");
        Ok(collection)
    }

    /// Fetch a collection or fail with `NotFound`
    pub fn get(&self, collection_id: &str) -> Result<Collection> {
        self.store
            .get_collection(collection_id)?
            .ok_or_else(|| ShoalError::not_found(format!("collection '{collection_id}'")))
    }

    /// Fetch a collection if it exists
    pub fn try_get(&self, collection_id: &str) -> Result<Option<Collection>> {
        self.store.get_collection(collection_id)
    }

    /// All collections
    pub fn list(&self) -> Result<Vec<Collection>> {
        self.store.list_collections()
    }

    /// A collection with counts computed from the secondary indexes
    pub fn get_with_stats(&self, collection_id: &str) -> Result<CollectionWithStats> {
        let collection = self.get(collection_id)?;
        let stats = CollectionStats {
            document_count: self.store.document_count(collection_id)? as u32,
            vector_count: self.store.vector_count(collection_id)? as u32,
            created_at: collection.created_at,
            updated_at: collection.updated_at,
        };
        Ok(CollectionWithStats { collection, stats })
    }

    /// All collections with their stats
    pub fn list_with_stats(&self) -> Result<Vec<CollectionWithStats>> {
        self.list()?
            .into_iter()
            .map(|c| self.get_with_stats(&c.id))
            .collect()
    }

    /// Update display name and/or description (admin)
    pub fn update_metadata(
        &self,
        collection_id: &str,
        name: Option<String>,
        description: Option<String>,
        caller: &str,
    ) -> Result<()> {
        let mut collection = self.get(collection_id)?;
        require_admin_on(&collection, caller)?;

        if let Some(name) = name {
            if name.trim().is_empty() || name.len() > 100 {
                return Err(ShoalError::invalid_input(
                    "name",
                    "must be 1-100 characters",
                ));
            }
            collection.name = name;
        }
        if let Some(description) = description {
            if description.len() > 500 {
                return Err(ShoalError::invalid_input(
                    "description",
                    "must be at most 500 characters",
                ));
            }
            collection.description = Some(description);
        }

        collection.updated_at = now_nanos();
        self.store.put_collection(&collection)
    }

    /// Replace the collection settings (admin)
    ///
    /// Changes to `chunk_size`, `chunk_overlap`, or `embedding_model`
    /// would break the dimensionality and chunk-derivation invariants of
    /// already-embedded data, so they are rejected unless the collection
    /// holds no vectors.
    pub fn update_settings(
        &self,
        collection_id: &str,
        settings: CollectionSettings,
        caller: &str,
    ) -> Result<()> {
        let mut collection = self.get(collection_id)?;
        require_admin_on(&collection, caller)?;
        validate_settings(&settings)?;

        let reshapes_embeddings = settings.chunk_size != collection.settings.chunk_size
            || settings.chunk_overlap != collection.settings.chunk_overlap
            || settings.embedding_model != collection.settings.embedding_model;
        if reshapes_embeddings && self.store.vector_count(collection_id)? > 0 {
            return Err(ShoalError::invalid_input(
                "settings",
                "chunking and model settings are frozen while the collection holds vectors",
            ));
        }

        collection.settings = settings;
        collection.updated_at = now_nanos();
        self.store.put_collection(&collection)
    }

    /// Add a regular admin (genesis only); adding an existing admin is a
    /// no-op
    pub fn add_admin(&self, collection_id: &str, principal: &str, caller: &str) -> Result<()> {
        let mut collection = self.get(collection_id)?;
        require_genesis_on(&collection, caller)?;

        if collection.admins.iter().any(|a| a == principal) {
            return Ok(());
        }
        collection.admins.push(principal.to_string());
        collection.updated_at = now_nanos();
        self.store.put_collection(&collection)
    }

    /// Remove a regular admin (genesis only); the genesis principal cannot
    /// be removed, only transferred away from
    pub fn remove_admin(&self, collection_id: &str, principal: &str, caller: &str) -> Result<()> {
        let mut collection = self.get(collection_id)?;
        require_genesis_on(&collection, caller)?;

        if principal == collection.genesis_admin {
            return Err(ShoalError::invalid_input(
                "principal",
                "the genesis admin cannot be removed",
            ));
        }
        if !collection.admins.iter().any(|a| a == principal) {
            return Err(ShoalError::not_found(format!(
                "admin '{principal}' in collection '{collection_id}'"
            )));
        }

        collection.admins.retain(|a| a != principal);
        collection.updated_at = now_nanos();
        self.store.put_collection(&collection)
    }

    /// Hand genesis authority to an existing admin; the old genesis stays
    /// a regular admin
    pub fn transfer_genesis(
        &self,
        collection_id: &str,
        new_genesis: &str,
        caller: &str,
    ) -> Result<()> {
        let mut collection = self.get(collection_id)?;
        require_genesis_on(&collection, caller)?;

        if !collection.admins.iter().any(|a| a == new_genesis) {
            return Err(ShoalError::invalid_input(
                "principal",
                "the new genesis admin must already be an admin",
            ));
        }

        let old_genesis = collection.genesis_admin.clone();
        if !collection.admins.iter().any(|a| a == &old_genesis) {
            collection.admins.push(old_genesis.clone());
        }
        collection.genesis_admin = new_genesis.to_string();
        collection.updated_at = now_nanos();
        self.store.put_collection(&collection)?;
        tracing::info!(
            collection = collection_id,
            from = %old_genesis,
            to = new_genesis,
            "transferred genesis admin"
        );
        Ok(())
    }

    /// Delete the collection and everything it owns (genesis only)
    pub fn delete(&self, collection_id: &str, caller: &str) -> Result<()> {
        let collection = self.get(collection_id)?;
        require_genesis_on(&collection, caller)?;
        self.store.delete_collection_cascade(collection_id)
    }

    /// The admin list; the genesis principal is always included
    pub fn list_admins(&self, collection_id: &str) -> Result<Vec<Principal>> {
        let collection = self.get(collection_id)?;
        let mut admins = collection.admins;
        if !admins.iter().any(|a| a == &collection.genesis_admin) {
            admins.push(collection.genesis_admin);
        }
        Ok(admins)
    }

    /// The genesis admin of a collection
    pub fn genesis_admin(&self, collection_id: &str) -> Result<Principal> {
        Ok(self.get(collection_id)?.genesis_admin)
    }

    /// Authority of `principal` over the collection; `None` for missing
    /// collections as well as for strangers
    pub fn admin_level(&self, collection_id: &str, principal: &str) -> Result<AdminLevel> {
        let Some(collection) = self.try_get(collection_id)? else {
            return Ok(AdminLevel::None);
        };
        Ok(if collection.genesis_admin == principal {
            AdminLevel::Genesis
        } else if collection.admins.iter().any(|a| a == principal) {
            AdminLevel::Admin
        } else {
            AdminLevel::None
        })
    }

    /// True if `principal` holds any admin role
    pub fn is_admin(&self, collection_id: &str, principal: &str) -> Result<bool> {
        Ok(self.admin_level(collection_id, principal)? != AdminLevel::None)
    }

    /// Fail with `NotAuthorized` unless `caller` holds any admin role
    ///
    /// Callers are expected to have resolved the collection first, so a
    /// missing one surfaces as `NotFound` before authorization is judged.
    pub fn require_admin(&self, collection_id: &str, caller: &str) -> Result<()> {
        match self.admin_level(collection_id, caller)? {
            AdminLevel::Genesis | AdminLevel::Admin => Ok(()),
            AdminLevel::None => Err(ShoalError::NotAuthorized),
        }
    }

    /// Fail with `NotAuthorized` unless `caller` is the genesis admin
    pub fn require_genesis(&self, collection_id: &str, caller: &str) -> Result<()> {
        match self.admin_level(collection_id, caller)? {
            AdminLevel::Genesis => Ok(()),
            _ => Err(ShoalError::NotAuthorized),
        }
    }
}

fn require_admin_on(collection: &Collection, caller: &str) -> Result<()> {
    if collection.is_admin(caller) {
        Ok(())
    } else {
        Err(ShoalError::NotAuthorized)
    }
}

fn require_genesis_on(collection: &Collection, caller: &str) -> Result<()> {
    if collection.genesis_admin == caller {
        Ok(())
    } else {
        Err(ShoalError::NotAuthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager() -> (tempfile::TempDir, CollectionManager) {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path().join("t.redb")).unwrap();
        (dir, CollectionManager::new(store))
    }

    fn request(id: &str) -> CreateCollectionRequest {
        CreateCollectionRequest {
            id: id.to_string(),
            name: "Test".to_string(),
            description: None,
            settings: None,
        }
    }

    #[test]
    fn creator_becomes_genesis_admin() {
        let (_dir, manager) = manager();
        let collection = manager.create(request("c1"), "alice").unwrap();
        assert_eq!(collection.genesis_admin, "alice");
        assert_eq!(manager.admin_level("c1", "alice").unwrap(), AdminLevel::Genesis);
        assert_eq!(manager.admin_level("c1", "bob").unwrap(), AdminLevel::None);
    }

    #[test]
    fn reserved_and_duplicate_ids_are_rejected() {
        let (_dir, manager) = manager();
        assert!(manager.create(request("__hidden"), "alice").is_err());

        manager.create(request("c1"), "alice").unwrap();
        assert!(matches!(
            manager.create(request("c1"), "bob"),
            Err(ShoalError::AlreadyExists(_))
        ));
    }

    #[test]
    fn only_genesis_manages_admins() {
        let (_dir, manager) = manager();
        manager.create(request("c1"), "alice").unwrap();
        manager.add_admin("c1", "bob", "alice").unwrap();

        assert_eq!(manager.admin_level("c1", "bob").unwrap(), AdminLevel::Admin);
        assert!(matches!(
            manager.add_admin("c1", "carol", "bob"),
            Err(ShoalError::NotAuthorized)
        ));

        // Duplicate add is a no-op
        manager.add_admin("c1", "bob", "alice").unwrap();
        assert_eq!(
            manager
                .list_admins("c1")
                .unwrap()
                .iter()
                .filter(|a| a.as_str() == "bob")
                .count(),
            1
        );
    }

    #[test]
    fn genesis_cannot_be_removed_but_can_transfer() {
        let (_dir, manager) = manager();
        manager.create(request("c1"), "alice").unwrap();
        manager.add_admin("c1", "bob", "alice").unwrap();

        assert!(manager.remove_admin("c1", "alice", "alice").is_err());

        manager.transfer_genesis("c1", "bob", "alice").unwrap();
        assert_eq!(manager.genesis_admin("c1").unwrap(), "bob");
        // Old genesis stays a regular admin
        assert_eq!(manager.admin_level("c1", "alice").unwrap(), AdminLevel::Admin);

        // Transfer requires an existing admin as the target
        assert!(manager.transfer_genesis("c1", "mallory", "bob").is_err());
    }

    #[test]
    fn settings_freeze_once_vectors_exist() {
        use crate::types::{chunk_id_for, vector_id_for, DocumentMetadata, SemanticChunk, Vector};

        let (_dir, manager) = manager();
        manager.create(request("c1"), "alice").unwrap();

        let mut settings = manager.get("c1").unwrap().settings;
        settings.chunk_size = 256;
        manager
            .update_settings("c1", settings.clone(), "alice")
            .expect("settings change allowed while empty");

        // Seed one vector, then try to reshape again
        let store = manager.store.clone();
        let chunk = SemanticChunk {
            id: chunk_id_for("doc_a", 0),
            document_id: "doc_a".to_string(),
            text: "t".to_string(),
            position: 0,
            char_start: 0,
            char_end: 1,
            token_count: None,
        };
        let doc = DocumentMetadata {
            id: "doc_a".to_string(),
            collection_id: "c1".to_string(),
            title: "T".to_string(),
            total_chunks: 1,
            ..Default::default()
        };
        store.insert_document(&doc, &[chunk]).unwrap();
        store
            .insert_vectors(
                "c1",
                &[Vector {
                    id: vector_id_for("doc_a", 0),
                    document_id: "doc_a".to_string(),
                    chunk_id: chunk_id_for("doc_a", 0),
                    embedding: vec![1.0, 0.0],
                    norm: 1.0,
                    model: "m".to_string(),
                    created_at: 0,
                }],
            )
            .unwrap();

        settings.chunk_size = 128;
        assert!(manager.update_settings("c1", settings.clone(), "alice").is_err());

        // Non-reshaping fields still update freely
        let mut relaxed = manager.get("c1").unwrap().settings;
        relaxed.max_documents = Some(10);
        manager.update_settings("c1", relaxed, "alice").unwrap();
    }

    #[test]
    fn missing_collections_report_not_found_before_authorization() {
        let (_dir, manager) = manager();

        assert!(matches!(
            manager.delete("ghost", "alice"),
            Err(ShoalError::NotFound(_))
        ));
        assert!(matches!(
            manager.add_admin("ghost", "bob", "alice"),
            Err(ShoalError::NotFound(_))
        ));
        assert!(matches!(
            manager.remove_admin("ghost", "bob", "alice"),
            Err(ShoalError::NotFound(_))
        ));
        assert!(matches!(
            manager.transfer_genesis("ghost", "bob", "alice"),
            Err(ShoalError::NotFound(_))
        ));
        assert!(matches!(
            manager.update_metadata("ghost", Some("N".into()), None, "alice"),
            Err(ShoalError::NotFound(_))
        ));
        assert!(matches!(
            manager.update_settings("ghost", CollectionSettings::default(), "alice"),
            Err(ShoalError::NotFound(_))
        ));
    }

    #[test]
    fn delete_requires_genesis() {
        let (_dir, manager) = manager();
        manager.create(request("c1"), "alice").unwrap();
        manager.add_admin("c1", "bob", "alice").unwrap();

        assert!(matches!(
            manager.delete("c1", "bob"),
            Err(ShoalError::NotAuthorized)
        ));
        manager.delete("c1", "alice").unwrap();
        assert!(manager.try_get("c1").unwrap().is_none());
    }
}
