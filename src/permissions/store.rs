use super::resolve::{collections_overlap, is_allowed, rule_matches};
use super::types::{Effect, Permission, ScopeRule};
use crate::db_operations::{compose_key, prefix_key, DbOperations};
use crate::error::{PearError, PearResult};
use crate::grantee::{
    is_wildcard_collection, validate_collection, validate_record_key, Did, Grantee, URI_SCHEME,
};
use crate::{log_permissions_debug, log_permissions_info};
use sled::transaction::ConflictableTransactionResult;
use sled::Transactional;
use std::collections::BTreeMap;

/// Durable table of permission rows.
///
/// Every row lives twice: once keyed `owner / grantee / collection / key` for
/// owner-side listing and once keyed `grantee / owner / collection / key` for
/// the lookups a permission check performs. Both copies are written in one
/// sled transaction, and there is at most one row per
/// `(grantee, owner, collection, key)`, so repeated grants are idempotent.
///
/// The store does not expand cliques; a clique grantee is just another
/// string key here.
#[derive(Clone)]
pub struct PermissionStore {
    ops: DbOperations,
}

/// Rows to write and delete in one transaction.
#[derive(Default)]
struct ChangeSet {
    puts: Vec<Permission>,
    deletes: Vec<(Grantee, Did, String, Option<String>)>,
}

fn owner_key(
    owner: &Did,
    grantee: &Grantee,
    collection: &str,
    record_key: Option<&str>,
) -> PearResult<String> {
    let grantee = grantee.to_string();
    compose_key(&[
        owner.as_str(),
        &grantee,
        collection,
        record_key.unwrap_or(""),
    ])
}

fn grantee_key(
    grantee: &Grantee,
    owner: &Did,
    collection: &str,
    record_key: Option<&str>,
) -> PearResult<String> {
    let grantee = grantee.to_string();
    compose_key(&[
        &grantee,
        owner.as_str(),
        collection,
        record_key.unwrap_or(""),
    ])
}

fn validate_scope(collection: &str, record_key: Option<&str>) -> PearResult<()> {
    validate_collection(collection)?;
    if let Some(key) = record_key {
        validate_record_key(key)?;
        if is_wildcard_collection(collection) {
            return Err(PearError::InvalidInput(format!(
                "record key '{}' cannot be combined with wildcard collection '{}'",
                key, collection
            )));
        }
    }
    Ok(())
}

impl PermissionStore {
    pub fn new(ops: DbOperations) -> Self {
        Self { ops }
    }

    /// Whether `requester` may read `(owner, collection, record_key)` through
    /// rows granted directly to it. The owner always may. No row means no.
    pub fn has_permission(
        &self,
        requester: &Did,
        owner: &Did,
        collection: &str,
        record_key: &str,
    ) -> PearResult<bool> {
        if requester == owner {
            return Ok(true);
        }
        let rules: Vec<ScopeRule> = self
            .grants_between(&Grantee::Identity(requester.clone()), owner)?
            .iter()
            .map(Permission::rule)
            .collect();
        let allowed = is_allowed(&rules, collection, record_key);
        log_permissions_debug!(
            "has_permission {} -> {}/{}/{} = {}",
            requester,
            owner,
            collection,
            record_key,
            allowed
        );
        Ok(allowed)
    }

    /// Every row granted to `grantee` by `owner`.
    pub fn grants_between(&self, grantee: &Grantee, owner: &Did) -> PearResult<Vec<Permission>> {
        let grantee_str = grantee.to_string();
        let prefix = prefix_key(&[&grantee_str, owner.as_str()])?;
        Ok(self
            .ops
            .scan_prefix_in_tree::<Permission>(&self.ops.permissions_by_grantee_tree, &prefix)?
            .into_iter()
            .map(|(_, permission)| permission)
            .collect())
    }

    /// Every row owned by `owner` that applies to `(collection, record_key)`,
    /// whatever the grantee.
    pub fn rules_for_record(
        &self,
        owner: &Did,
        collection: &str,
        record_key: &str,
    ) -> PearResult<Vec<Permission>> {
        Ok(self
            .list_permissions_by_owner(owner)?
            .into_iter()
            .filter(|permission| rule_matches(&permission.rule(), collection, record_key))
            .collect())
    }

    /// Every row owned by `owner`, allow and deny.
    pub fn list_permissions_by_owner(&self, owner: &Did) -> PearResult<Vec<Permission>> {
        let prefix = prefix_key(&[owner.as_str()])?;
        Ok(self
            .ops
            .scan_prefix_in_tree::<Permission>(&self.ops.permissions_tree, &prefix)?
            .into_iter()
            .map(|(_, permission)| permission)
            .collect())
    }

    /// Grants read on `(owner, collection, record_key)` to every grantee.
    ///
    /// A collection-wide grant (`record_key == None`) also deletes the
    /// grantee's narrower allow rows in the same collection, which it now
    /// makes redundant.
    pub fn add_read_permission(
        &self,
        grantees: &[Grantee],
        owner: &Did,
        collection: &str,
        record_key: Option<&str>,
    ) -> PearResult<Vec<Permission>> {
        validate_scope(collection, record_key)?;
        if grantees.is_empty() {
            return Err(PearError::InvalidInput(
                "at least one grantee is required".to_string(),
            ));
        }

        let mut changes = ChangeSet::default();
        for grantee in grantees {
            let existing = self.grants_between(grantee, owner)?;
            let previous = existing.iter().find(|row| {
                row.collection == collection && row.record_key.as_deref() == record_key
            });
            let mut row = Permission::new(
                grantee.clone(),
                owner.clone(),
                collection,
                record_key,
                Effect::Allow,
            );
            if let Some(previous) = previous.filter(|p| p.is_allow()) {
                row.created_at = previous.created_at;
            }
            changes.puts.push(row);

            if record_key.is_none() {
                for narrower in existing.iter().filter(|row| {
                    row.collection == collection && row.record_key.is_some() && row.is_allow()
                }) {
                    changes.deletes.push((
                        grantee.clone(),
                        owner.clone(),
                        narrower.collection.clone(),
                        narrower.record_key.clone(),
                    ));
                }
            }
        }

        let granted = changes.puts.clone();
        self.apply(changes)?;
        log_permissions_info!(
            "{} granted read on {}/{} to {} grantee(s)",
            owner,
            collection,
            record_key.unwrap_or("*"),
            grantees.len()
        );
        Ok(granted)
    }

    /// Revokes read on `(owner, collection, record_key)` from every grantee.
    ///
    /// Without a record key every row for `(grantee, owner, collection)` goes.
    /// With one, the specific row is deleted unless a broader allow would still
    /// cover the record, in which case a deny row is written instead.
    pub fn remove_read_permission(
        &self,
        grantees: &[Grantee],
        owner: &Did,
        collection: &str,
        record_key: Option<&str>,
    ) -> PearResult<()> {
        validate_scope(collection, record_key)?;
        if grantees.is_empty() {
            return Err(PearError::InvalidInput(
                "at least one grantee is required".to_string(),
            ));
        }

        let mut changes = ChangeSet::default();
        for grantee in grantees {
            let existing = self.grants_between(grantee, owner)?;
            match record_key {
                None => {
                    for row in existing.iter().filter(|row| row.collection == collection) {
                        changes.deletes.push((
                            grantee.clone(),
                            owner.clone(),
                            row.collection.clone(),
                            row.record_key.clone(),
                        ));
                    }
                }
                Some(key) => {
                    let broader: Vec<ScopeRule> = existing
                        .iter()
                        .filter(|row| {
                            !(row.collection == collection && row.record_key.as_deref() == Some(key))
                        })
                        .map(Permission::rule)
                        .collect();
                    if is_allowed(&broader, collection, key) {
                        changes.puts.push(Permission::new(
                            grantee.clone(),
                            owner.clone(),
                            collection,
                            Some(key),
                            Effect::Deny,
                        ));
                    } else {
                        changes.deletes.push((
                            grantee.clone(),
                            owner.clone(),
                            collection.to_string(),
                            Some(key.to_string()),
                        ));
                    }
                }
            }
        }

        self.apply(changes)?;
        log_permissions_info!(
            "{} revoked read on {}/{} from {} grantee(s)",
            owner,
            collection,
            record_key.unwrap_or("*"),
            grantees.len()
        );
        Ok(())
    }

    /// Every currently-allowed grant owned by `owner`, keyed by `collection`
    /// for collection-wide grants and `collection.recordKey` for record grants.
    pub fn list_read_permissions_by_lexicon(
        &self,
        owner: &Did,
    ) -> PearResult<BTreeMap<String, Vec<String>>> {
        let mut by_scope: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in self
            .list_permissions_by_owner(owner)?
            .into_iter()
            .filter(Permission::is_allow)
        {
            let scope = match &row.record_key {
                Some(key) => format!("{}.{}", row.collection, key),
                None => row.collection.clone(),
            };
            by_scope.entry(scope).or_default().push(row.grantee.to_string());
        }
        for grantees in by_scope.values_mut() {
            grantees.sort();
            grantees.dedup();
        }
        Ok(by_scope)
    }

    /// Rows granted to `grantee` whose collection can overlap `collection`
    /// (a name or pattern). An empty `collection` returns every row.
    pub fn list_grants_to(&self, grantee: &Grantee, collection: &str) -> PearResult<Vec<Permission>> {
        let grantee_str = grantee.to_string();
        let prefix = prefix_key(&[&grantee_str])?;
        self.scan_grantee_rows(&prefix, collection)
    }

    /// Rows granted to any clique, restricted as in [`Self::list_grants_to`].
    pub fn list_clique_grants(&self, collection: &str) -> PearResult<Vec<Permission>> {
        self.scan_grantee_rows(URI_SCHEME, collection)
    }

    fn scan_grantee_rows(&self, prefix: &str, collection: &str) -> PearResult<Vec<Permission>> {
        Ok(self
            .ops
            .scan_prefix_in_tree::<Permission>(&self.ops.permissions_by_grantee_tree, prefix)?
            .into_iter()
            .map(|(_, permission)| permission)
            .filter(|permission| {
                collection.is_empty() || collections_overlap(&permission.collection, collection)
            })
            .collect())
    }

    /// Like [`Self::list_grants_to`], plus a synthetic collection-wide allow
    /// owned by the grantee itself so its own records are always included.
    pub fn list_read_permissions_by_grantee(
        &self,
        grantee: &Grantee,
        collection: &str,
    ) -> PearResult<Vec<Permission>> {
        let mut rows = self.list_grants_to(grantee, collection)?;
        if let Grantee::Identity(did) = grantee {
            let scope = if collection.is_empty() { "*" } else { collection };
            rows.push(Permission::new(
                grantee.clone(),
                did.clone(),
                scope,
                None,
                Effect::Allow,
            ));
        }
        Ok(rows)
    }

    fn apply(&self, changes: ChangeSet) -> PearResult<()> {
        let mut deletes = Vec::with_capacity(changes.deletes.len());
        for (grantee, owner, collection, record_key) in &changes.deletes {
            deletes.push((
                owner_key(owner, grantee, collection, record_key.as_deref())?,
                grantee_key(grantee, owner, collection, record_key.as_deref())?,
            ));
        }
        let mut puts = Vec::with_capacity(changes.puts.len());
        for row in &changes.puts {
            let bytes = serde_json::to_vec(row)?;
            puts.push((
                owner_key(&row.owner, &row.grantee, &row.collection, row.record_key.as_deref())?,
                grantee_key(&row.grantee, &row.owner, &row.collection, row.record_key.as_deref())?,
                bytes,
            ));
        }

        (
            &self.ops.permissions_tree,
            &self.ops.permissions_by_grantee_tree,
        )
            .transaction(
                |(by_owner, by_grantee)| -> ConflictableTransactionResult<(), PearError> {
                    for (owner_key, grantee_key) in &deletes {
                        by_owner.remove(owner_key.as_bytes())?;
                        by_grantee.remove(grantee_key.as_bytes())?;
                    }
                    for (owner_key, grantee_key, bytes) in &puts {
                        by_owner.insert(owner_key.as_bytes(), bytes.as_slice())?;
                        by_grantee.insert(grantee_key.as_bytes(), bytes.as_slice())?;
                    }
                    Ok(())
                },
            )?;
        Ok(())
    }
}
