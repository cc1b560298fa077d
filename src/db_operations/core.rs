use crate::error::{PearError, PearResult};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;

/// Database operations struct that provides unified access to every sled tree
/// the node uses. Cloning is cheap; all clones share the same trees.
#[derive(Clone)]
pub struct DbOperations {
    /// The underlying sled database instance
    db: sled::Db,
    /// Permission rows keyed owner, grantee, collection, record key
    pub(crate) permissions_tree: sled::Tree,
    /// The same rows keyed grantee, owner, collection, record key
    pub(crate) permissions_by_grantee_tree: sled::Tree,
    pub(crate) records_tree: sled::Tree,
    pub(crate) blobs_tree: sled::Tree,
    pub(crate) blob_meta_tree: sled::Tree,
    pub(crate) blob_refs_tree: sled::Tree,
    pub(crate) identities_tree: sled::Tree,
    pub(crate) inbox_tree: sled::Tree,
    pub(crate) outbox_tree: sled::Tree,
    pub(crate) node_keys_tree: sled::Tree,
}

impl DbOperations {
    /// Creates a new DbOperations instance with all required trees
    pub fn new(db: sled::Db) -> Result<Self, sled::Error> {
        let permissions_tree = db.open_tree("permissions")?;
        let permissions_by_grantee_tree = db.open_tree("permissions_by_grantee")?;
        let records_tree = db.open_tree("records")?;
        let blobs_tree = db.open_tree("blobs")?;
        let blob_meta_tree = db.open_tree("blob_meta")?;
        let blob_refs_tree = db.open_tree("blob_refs")?;
        let identities_tree = db.open_tree("identities")?;
        let inbox_tree = db.open_tree("inbox")?;
        let outbox_tree = db.open_tree("outbox")?;
        let node_keys_tree = db.open_tree("node_keys")?;

        Ok(Self {
            db,
            permissions_tree,
            permissions_by_grantee_tree,
            records_tree,
            blobs_tree,
            blob_meta_tree,
            blob_refs_tree,
            identities_tree,
            inbox_tree,
            outbox_tree,
            node_keys_tree,
        })
    }

    /// Opens (or creates) a database at `path`.
    pub fn open(path: &std::path::Path) -> PearResult<Self> {
        let db = sled::open(path)?;
        Ok(Self::new(db)?)
    }

    /// Opens a throwaway in-memory database.
    pub fn temporary() -> PearResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::new(db)?)
    }

    /// Gets a reference to the underlying database
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Flushes every dirty buffer to disk.
    pub fn flush(&self) -> PearResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Gets database statistics
    pub fn get_stats(&self) -> HashMap<String, u64> {
        let mut stats = HashMap::new();
        stats.insert("permissions".to_string(), self.permissions_tree.len() as u64);
        stats.insert("records".to_string(), self.records_tree.len() as u64);
        stats.insert("blobs".to_string(), self.blobs_tree.len() as u64);
        stats.insert("identities".to_string(), self.identities_tree.len() as u64);
        stats.insert("inbox".to_string(), self.inbox_tree.len() as u64);
        stats.insert("outbox".to_string(), self.outbox_tree.len() as u64);
        stats
    }

    // ========== GENERIC TREE OPERATIONS ==========

    /// Stores any serializable item in a specific tree, replacing what was there
    pub fn store_in_tree<T: Serialize>(
        &self,
        tree: &sled::Tree,
        key: &str,
        item: &T,
    ) -> PearResult<()> {
        let bytes = serde_json::to_vec(item)?;
        tree.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Retrieves any deserializable item from a specific tree
    pub fn get_from_tree<T: DeserializeOwned>(
        &self,
        tree: &sled::Tree,
        key: &str,
    ) -> PearResult<Option<T>> {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Lists all key-value pairs in a tree whose key starts with `prefix`
    pub fn scan_prefix_in_tree<T: DeserializeOwned>(
        &self,
        tree: &sled::Tree,
        prefix: &str,
    ) -> PearResult<Vec<(String, T)>> {
        let mut items = Vec::new();
        for result in tree.scan_prefix(prefix.as_bytes()) {
            let (key, value) = result?;
            let key_str = String::from_utf8_lossy(&key).to_string();
            let item = serde_json::from_slice(&value).map_err(|e| {
                PearError::Serialization(format!(
                    "Deserialization failed for key '{}': {}",
                    key_str.replace('\u{0}', "/"),
                    e
                ))
            })?;
            items.push((key_str, item));
        }
        Ok(items)
    }

    /// Lists the keys in a tree that start with `prefix`
    pub fn scan_keys_in_tree(&self, tree: &sled::Tree, prefix: &str) -> PearResult<Vec<String>> {
        let mut keys = Vec::new();
        for result in tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) = result?;
            keys.push(String::from_utf8_lossy(&key).to_string());
        }
        Ok(keys)
    }

    /// Deletes an item from a specific tree
    pub fn delete_from_tree(&self, tree: &sled::Tree, key: &str) -> PearResult<bool> {
        Ok(tree.remove(key.as_bytes())?.is_some())
    }

    /// Checks if a key exists in a specific tree
    pub fn exists_in_tree(&self, tree: &sled::Tree, key: &str) -> PearResult<bool> {
        Ok(tree.contains_key(key.as_bytes())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        value: u32,
    }

    #[test]
    fn stores_scans_and_deletes() {
        let ops = DbOperations::temporary().unwrap();
        let tree = ops.records_tree.clone();
        ops.store_in_tree(&tree, "a\u{0}1", &Item { value: 1 }).unwrap();
        ops.store_in_tree(&tree, "a\u{0}2", &Item { value: 2 }).unwrap();
        ops.store_in_tree(&tree, "b\u{0}1", &Item { value: 3 }).unwrap();

        let items: Vec<(String, Item)> = ops.scan_prefix_in_tree(&tree, "a\u{0}").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            ops.get_from_tree::<Item>(&tree, "b\u{0}1").unwrap(),
            Some(Item { value: 3 })
        );
        assert!(ops.delete_from_tree(&tree, "b\u{0}1").unwrap());
        assert!(!ops.exists_in_tree(&tree, "b\u{0}1").unwrap());
        assert_eq!(ops.get_stats()["records"], 2);
    }
}
