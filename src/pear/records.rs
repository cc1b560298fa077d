use super::Pear;
use crate::error::{PearError, PearResult};
use crate::grantee::{
    is_wildcard_collection, validate_collection, validate_record_key, Did, Grantee, RecordUri,
    CLIQUE_COLLECTION,
};
use crate::inbox::Notification;
use crate::network::XrpcRequest;
use crate::permissions::{collection_matches, is_allowed, Permission, ScopeRule};
use crate::repo::{BlobRef, Record};
use crate::{log_orchestrator_debug, log_orchestrator_info, log_orchestrator_warn};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

/// A record as submitted by its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub collection: String,
    /// Generated when absent
    pub record_key: Option<String>,
    pub value: Value,
    pub blobs: Vec<BlobRef>,
}

impl NewRecord {
    pub fn new(collection: &str, value: Value) -> Self {
        Self {
            collection: collection.to_string(),
            record_key: None,
            value,
            blobs: Vec::new(),
        }
    }

    pub fn with_key(mut self, record_key: &str) -> Self {
        self.record_key = Some(record_key.to_string());
        self
    }

    pub fn with_blobs(mut self, blobs: Vec<BlobRef>) -> Self {
        self.blobs = blobs;
        self
    }
}

impl Pear {
    /// Stores a record for `owner`, grants it to `grantees` and tells every
    /// non-local grantee about it.
    pub async fn put_record(
        &self,
        caller: &Did,
        owner: &Did,
        record: NewRecord,
        validate: bool,
        grantees: &[Grantee],
    ) -> PearResult<Record> {
        if caller != owner {
            return Err(PearError::Unauthorized);
        }
        self.repo.ensure_hosted(owner)?;
        validate_collection(&record.collection)?;
        if is_wildcard_collection(&record.collection) {
            return Err(PearError::InvalidInput(format!(
                "cannot write to wildcard collection '{}'",
                record.collection
            )));
        }
        let record_key = match record.record_key {
            Some(key) => key,
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        validate_record_key(&record_key)?;
        if validate {
            let validator = self.validator.as_ref().ok_or_else(|| {
                PearError::ValidationFailed("no schema validator is configured".to_string())
            })?;
            validator.validate(&record.collection, &record.value)?;
        }
        Self::check_grantees(&record.collection, grantees)?;

        let stored = self.repo.put_record(
            owner,
            &record.collection,
            &record_key,
            record.value,
            record.blobs,
        )?;
        let mut notified = self.standing_grantees(owner, &stored.collection, &stored.record_key)?;
        if !grantees.is_empty() {
            self.permissions.add_read_permission(
                grantees,
                owner,
                &stored.collection,
                Some(&stored.record_key),
            )?;
            notified.retain(|grantee| !grantees.contains(grantee));
            notified.extend_from_slice(grantees);
        }
        if !notified.is_empty() {
            self.notify_grantees(owner, &notified, &stored.collection, Some(&stored.record_key))
                .await?;
        }
        log_orchestrator_info!("{} stored {}", owner, stored.uri);
        Ok(stored)
    }

    /// Reads one record. Owners hosted elsewhere yield `NotLocalRepo`; an
    /// unauthorized caller cannot tell a missing record from a hidden one.
    pub async fn get_record(
        &self,
        caller: &Did,
        owner: &Did,
        collection: &str,
        record_key: &str,
    ) -> PearResult<Record> {
        self.repo.ensure_hosted(owner)?;
        RecordUri::new(owner.clone(), collection, record_key)?;
        if !self.authorize(caller, owner, collection, record_key).await? {
            return Err(PearError::Unauthorized);
        }
        self.repo.get_record(owner, collection, record_key)
    }

    /// Every record in `collection` (a name or pattern) that `caller` may
    /// read: local owners answered from the repository, remote owners
    /// fetched for each inbox entry the caller holds. Remote fetch failures
    /// drop that record only. Results are unique per address and sorted.
    pub async fn list_records(
        &self,
        caller: &Did,
        collection: &str,
        owners: Option<&[Did]>,
    ) -> PearResult<Vec<Record>> {
        validate_collection(collection)?;
        let wanted = |owner: &Did| owners.map_or(true, |owners| owners.contains(owner));

        let mut records = Vec::new();
        for (owner, rules) in self.local_rules_for(caller, collection, owners).await? {
            if !wanted(&owner) || !self.is_local(&owner)? {
                continue;
            }
            records.extend(self.repo.list_records(&owner, collection, &rules)?);
        }

        if self.is_local(caller)? {
            let mut seen = HashSet::new();
            let mut pending = Vec::new();
            for notification in self
                .inbox
                .get_collection_updates_by_recipient(caller, collection)?
            {
                if !wanted(&notification.sender) || self.is_local(&notification.sender)? {
                    continue;
                }
                let address = (
                    notification.sender.clone(),
                    notification.collection.clone(),
                    notification.record_key.clone(),
                );
                if seen.insert(address) {
                    pending.push(notification);
                }
            }
            records.extend(self.fetch_remote_records(caller, pending).await);
        }

        let mut unique: BTreeMap<String, Record> = BTreeMap::new();
        for record in records {
            unique.entry(record.uri.to_string()).or_insert(record);
        }
        Ok(unique.into_values().collect())
    }

    /// Scope rules `caller` holds on each wanted owner with records here:
    /// direct grants, the synthetic self-allow, and grants to cliques the
    /// caller belongs to. Memberships are resolved concurrently; one that
    /// cannot be resolved drops only that clique's grants.
    async fn local_rules_for(
        &self,
        caller: &Did,
        collection: &str,
        owners: Option<&[Did]>,
    ) -> PearResult<BTreeMap<Did, Vec<ScopeRule>>> {
        let wanted = |owner: &Did| owners.map_or(true, |owners| owners.contains(owner));
        let mut by_owner: BTreeMap<Did, Vec<ScopeRule>> = BTreeMap::new();
        for row in self
            .permissions
            .list_read_permissions_by_grantee(&Grantee::Identity(caller.clone()), collection)?
        {
            if wanted(&row.owner) {
                by_owner.entry(row.owner.clone()).or_default().push(row.rule());
            }
        }

        let mut by_clique: BTreeMap<RecordUri, Vec<Permission>> = BTreeMap::new();
        for row in self.permissions.list_clique_grants(collection)? {
            if &row.owner == caller || !wanted(&row.owner) || !self.is_local(&row.owner)? {
                continue;
            }
            if let Some(clique) = row.grantee.as_clique().cloned() {
                by_clique.entry(clique).or_default().push(row);
            }
        }

        let concurrency = self.config.list_fetch_concurrency.max(1);
        let resolved: Vec<(Vec<Permission>, bool)> = stream::iter(by_clique)
            .map(|(clique, rows)| async move {
                let Some(asker) = rows.first().map(|row| row.owner.clone()) else {
                    return (rows, false);
                };
                match self.is_clique_member(&asker, caller, &clique).await {
                    Ok(member) => (rows, member),
                    Err(e) => {
                        log_orchestrator_warn!(
                            "skipping grants to {} while listing for {}: {}",
                            clique,
                            caller,
                            e
                        );
                        (rows, false)
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        for (rows, member) in resolved {
            if !member {
                continue;
            }
            for row in rows {
                by_owner.entry(row.owner.clone()).or_default().push(row.rule());
            }
        }
        Ok(by_owner)
    }

    /// Grantees already allowed `(collection, record_key)` through a
    /// collection-wide grant of `owner`, so a new record reaches them too.
    fn standing_grantees(
        &self,
        owner: &Did,
        collection: &str,
        record_key: &str,
    ) -> PearResult<Vec<Grantee>> {
        let mut by_grantee: BTreeMap<Grantee, (bool, Vec<ScopeRule>)> = BTreeMap::new();
        for row in self.permissions.rules_for_record(owner, collection, record_key)? {
            let (wide, rules) = by_grantee.entry(row.grantee.clone()).or_default();
            *wide |= row.record_key.is_none() && row.is_allow();
            rules.push(row.rule());
        }
        Ok(by_grantee
            .into_iter()
            .filter(|(_, (wide, rules))| *wide && is_allowed(rules, collection, record_key))
            .map(|(grantee, _)| grantee)
            .collect())
    }

    async fn fetch_remote_records(&self, caller: &Did, pending: Vec<Notification>) -> Vec<Record> {
        let concurrency = self.config.list_fetch_concurrency.max(1);
        stream::iter(pending)
            .map(|notification| async move {
                let request = XrpcRequest::query(
                    "pear.getRecord",
                    json!({
                        "owner": notification.sender,
                        "collection": notification.collection,
                        "recordKey": notification.record_key,
                    }),
                );
                let fetched = self
                    .call_remote(caller, &notification.sender, request)
                    .await
                    .and_then(|body| {
                        let record = body.get("record").cloned().unwrap_or(Value::Null);
                        Ok(serde_json::from_value::<Record>(record)?)
                    });
                match fetched {
                    Ok(record) => Some(record),
                    Err(e) => {
                        log_orchestrator_debug!(
                            "dropping {}/{}/{} from listing for {}: {}",
                            notification.sender,
                            notification.collection,
                            notification.record_key,
                            caller,
                            e
                        );
                        None
                    }
                }
            })
            .buffer_unordered(concurrency)
            .filter_map(|record| async move { record })
            .collect()
            .await
    }

    /// Stores a blob for `caller`.
    pub fn upload_blob(&self, caller: &Did, bytes: &[u8], mime_type: &str) -> PearResult<BlobRef> {
        self.repo.upload_blob(caller, bytes, mime_type)
    }

    /// Reads a blob: allowed to its owner, and to anyone who may read at least
    /// one record referencing it.
    pub async fn get_blob(
        &self,
        caller: &Did,
        owner: &Did,
        cid: &str,
    ) -> PearResult<(BlobRef, Vec<u8>)> {
        self.repo.ensure_hosted(owner)?;
        if caller != owner {
            let mut allowed = false;
            for (collection, record_key) in self.repo.records_referencing_blob(owner, cid)? {
                if self.authorize(caller, owner, &collection, &record_key).await? {
                    allowed = true;
                    break;
                }
            }
            if !allowed {
                return Err(PearError::Unauthorized);
            }
        }
        self.repo.get_blob(owner, cid)
    }

    /// Rejects clique grantees on clique addresses: cliques do not nest.
    pub(crate) fn check_grantees(collection: &str, grantees: &[Grantee]) -> PearResult<()> {
        if collection_matches(collection, CLIQUE_COLLECTION)
            && grantees.iter().any(|grantee| grantee.as_clique().is_some())
        {
            return Err(PearError::InvalidInput(
                "cliques cannot be granted membership of other cliques".to_string(),
            ));
        }
        Ok(())
    }
}
