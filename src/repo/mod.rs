//! Local repository: records and blobs of the identities hosted on this node.
//!
//! No authorization happens here. Listing takes a set of scope rules and
//! filters with the same [`crate::permissions::resolve`] function permission
//! checks use, so both always agree on what a rule set covers.

mod types;

pub use types::{BlobRef, HostedIdentity, Record};

use crate::db_operations::{compose_key, prefix_key, split_key, DbOperations};
use crate::error::{PearError, PearResult};
use crate::grantee::{is_wildcard_collection, validate_collection, Did, RecordUri};
use crate::log_repo_debug;
use crate::permissions::{collection_matches, is_allowed, ScopeRule};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sled::transaction::ConflictableTransactionResult;
use sled::Transactional;

/// Prefix of every blob content identifier.
pub const CID_PREFIX: &str = "sha256-";

/// Content identifier for `bytes`.
pub fn blob_cid(bytes: &[u8]) -> String {
    format!("{}{}", CID_PREFIX, hex::encode(Sha256::digest(bytes)))
}

#[derive(Clone)]
pub struct Repository {
    ops: DbOperations,
}

impl Repository {
    pub fn new(ops: DbOperations) -> Self {
        Self { ops }
    }

    // ========== HOSTED IDENTITIES ==========

    /// Starts hosting `did` here. Registering an already hosted identity only
    /// updates its handle.
    pub fn create_identity(&self, did: &Did, handle: Option<&str>) -> PearResult<HostedIdentity> {
        let identity = match self.get_identity(did)? {
            Some(existing) => HostedIdentity {
                handle: handle.map(str::to_string).or(existing.handle),
                ..existing
            },
            None => HostedIdentity {
                did: did.clone(),
                handle: handle.map(str::to_string),
                created_at: Utc::now(),
            },
        };
        self.ops
            .store_in_tree(&self.ops.identities_tree, did.as_str(), &identity)?;
        log_repo_debug!("hosting identity {}", did);
        Ok(identity)
    }

    pub fn get_identity(&self, did: &Did) -> PearResult<Option<HostedIdentity>> {
        self.ops.get_from_tree(&self.ops.identities_tree, did.as_str())
    }

    pub fn is_hosted(&self, did: &Did) -> PearResult<bool> {
        self.ops.exists_in_tree(&self.ops.identities_tree, did.as_str())
    }

    /// Fails with `NotLocalRepo` unless `did` is hosted here.
    pub fn ensure_hosted(&self, did: &Did) -> PearResult<()> {
        if self.is_hosted(did)? {
            Ok(())
        } else {
            Err(PearError::NotLocalRepo(did.to_string()))
        }
    }

    pub fn list_identities(&self) -> PearResult<Vec<HostedIdentity>> {
        Ok(self
            .ops
            .scan_prefix_in_tree::<HostedIdentity>(&self.ops.identities_tree, "")?
            .into_iter()
            .map(|(_, identity)| identity)
            .collect())
    }

    // ========== RECORDS ==========

    /// Writes a record, replacing any previous value at the same address.
    /// Every referenced blob must already be stored for the owner.
    pub fn put_record(
        &self,
        owner: &Did,
        collection: &str,
        record_key: &str,
        value: serde_json::Value,
        blobs: Vec<BlobRef>,
    ) -> PearResult<Record> {
        self.ensure_hosted(owner)?;
        let uri = RecordUri::new(owner.clone(), collection, record_key)?;
        for blob in &blobs {
            let key = compose_key(&[owner.as_str(), &blob.cid])?;
            if !self.ops.exists_in_tree(&self.ops.blob_meta_tree, &key)? {
                return Err(PearError::InvalidInput(format!(
                    "record references unknown blob {}",
                    blob.cid
                )));
            }
        }

        let record_key_str = compose_key(&[owner.as_str(), collection, record_key])?;
        let previous: Option<Record> = self
            .ops
            .get_from_tree(&self.ops.records_tree, &record_key_str)?;
        let now = Utc::now();
        let record = Record {
            uri,
            owner: owner.clone(),
            collection: collection.to_string(),
            record_key: record_key.to_string(),
            value,
            blobs,
            created_at: previous.as_ref().map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };

        let stale_refs = previous
            .iter()
            .flat_map(|p| p.blobs.iter())
            .map(|blob| compose_key(&[owner.as_str(), &blob.cid, collection, record_key]))
            .collect::<PearResult<Vec<_>>>()?;
        let new_refs = record
            .blobs
            .iter()
            .map(|blob| compose_key(&[owner.as_str(), &blob.cid, collection, record_key]))
            .collect::<PearResult<Vec<_>>>()?;
        let bytes = serde_json::to_vec(&record)?;

        (&self.ops.records_tree, &self.ops.blob_refs_tree).transaction(
            |(records, blob_refs)| -> ConflictableTransactionResult<(), PearError> {
                for key in &stale_refs {
                    blob_refs.remove(key.as_bytes())?;
                }
                for key in &new_refs {
                    blob_refs.insert(key.as_bytes(), &[] as &[u8])?;
                }
                records.insert(record_key_str.as_bytes(), bytes.as_slice())?;
                Ok(())
            },
        )?;
        log_repo_debug!("stored {}", record.uri);
        Ok(record)
    }

    pub fn get_record(&self, owner: &Did, collection: &str, record_key: &str) -> PearResult<Record> {
        self.ensure_hosted(owner)?;
        let key = compose_key(&[owner.as_str(), collection, record_key])?;
        self.ops
            .get_from_tree(&self.ops.records_tree, &key)?
            .ok_or(PearError::RecordNotFound)
    }

    /// Records of `owner` in `collection` (a name or wildcard pattern) whose
    /// address `rules` resolve to allow.
    pub fn list_records(
        &self,
        owner: &Did,
        collection: &str,
        rules: &[ScopeRule],
    ) -> PearResult<Vec<Record>> {
        self.ensure_hosted(owner)?;
        validate_collection(collection)?;
        let prefix = if is_wildcard_collection(collection) {
            prefix_key(&[owner.as_str()])?
        } else {
            prefix_key(&[owner.as_str(), collection])?
        };
        Ok(self
            .ops
            .scan_prefix_in_tree::<Record>(&self.ops.records_tree, &prefix)?
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| collection_matches(collection, &record.collection))
            .filter(|record| is_allowed(rules, &record.collection, &record.record_key))
            .collect())
    }

    // ========== BLOBS ==========

    /// Stores `bytes` for `owner` under their digest. Uploading the same bytes
    /// twice yields the same reference.
    pub fn upload_blob(&self, owner: &Did, bytes: &[u8], mime_type: &str) -> PearResult<BlobRef> {
        self.ensure_hosted(owner)?;
        let blob = BlobRef {
            cid: blob_cid(bytes),
            mime_type: mime_type.to_string(),
            size: bytes.len() as u64,
        };
        let key = compose_key(&[owner.as_str(), &blob.cid])?;
        let meta = serde_json::to_vec(&blob)?;
        (&self.ops.blobs_tree, &self.ops.blob_meta_tree).transaction(
            |(blobs, blob_meta)| -> ConflictableTransactionResult<(), PearError> {
                blobs.insert(key.as_bytes(), bytes)?;
                blob_meta.insert(key.as_bytes(), meta.as_slice())?;
                Ok(())
            },
        )?;
        log_repo_debug!("stored blob {} ({} bytes) for {}", blob.cid, blob.size, owner);
        Ok(blob)
    }

    pub fn get_blob(&self, owner: &Did, cid: &str) -> PearResult<(BlobRef, Vec<u8>)> {
        self.ensure_hosted(owner)?;
        let key = compose_key(&[owner.as_str(), cid])?;
        let meta: BlobRef = self
            .ops
            .get_from_tree(&self.ops.blob_meta_tree, &key)?
            .ok_or(PearError::RecordNotFound)?;
        let bytes = self
            .ops
            .blobs_tree
            .get(key.as_bytes())?
            .ok_or(PearError::RecordNotFound)?;
        Ok((meta, bytes.to_vec()))
    }

    /// `(collection, record_key)` of every record of `owner` referencing `cid`.
    pub fn records_referencing_blob(
        &self,
        owner: &Did,
        cid: &str,
    ) -> PearResult<Vec<(String, String)>> {
        let prefix = prefix_key(&[owner.as_str(), cid])?;
        Ok(self
            .ops
            .scan_keys_in_tree(&self.ops.blob_refs_tree, &prefix)?
            .iter()
            .filter_map(|key| match split_key(key).as_slice() {
                [_, _, collection, record_key] => {
                    Some((collection.to_string(), record_key.to_string()))
                }
                _ => None,
            })
            .collect())
    }
}
