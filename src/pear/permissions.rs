use super::Pear;
use crate::error::{PearError, PearResult};
use crate::grantee::{Did, Grantee, RecordUri, CLIQUE_COLLECTION};
use crate::permissions::Permission;
use std::collections::BTreeMap;

impl Pear {
    /// Grants read on `(owner, collection, record_key)` to every grantee and
    /// notifies the grantees hosted elsewhere. Only the owner may grant.
    pub async fn add_permissions(
        &self,
        caller: &Did,
        grantees: &[Grantee],
        owner: &Did,
        collection: &str,
        record_key: Option<&str>,
    ) -> PearResult<Vec<Permission>> {
        if caller != owner {
            return Err(PearError::Unauthorized);
        }
        self.repo.ensure_hosted(owner)?;
        Self::check_grantees(collection, grantees)?;
        let granted = self
            .permissions
            .add_read_permission(grantees, owner, collection, record_key)?;
        self.notify_grantees(owner, grantees, collection, record_key)
            .await?;
        Ok(granted)
    }

    /// Revokes read on `(owner, collection, record_key)` from every grantee.
    /// Only the owner may revoke.
    pub fn remove_permissions(
        &self,
        caller: &Did,
        grantees: &[Grantee],
        owner: &Did,
        collection: &str,
        record_key: Option<&str>,
    ) -> PearResult<()> {
        if caller != owner {
            return Err(PearError::Unauthorized);
        }
        self.repo.ensure_hosted(owner)?;
        self.permissions
            .remove_read_permission(grantees, owner, collection, record_key)
    }

    /// Whether `requester` may read `(owner, collection, record_key)`.
    ///
    /// The caller must itself be able to read the address first; otherwise
    /// the answer would reveal grants the caller cannot see. On a clique
    /// address, an identity that has shared records with the clique may also
    /// ask who belongs to it.
    pub async fn has_permission(
        &self,
        caller: &Did,
        requester: &Did,
        owner: &Did,
        collection: &str,
        record_key: &str,
    ) -> PearResult<bool> {
        self.repo.ensure_hosted(owner)?;
        let caller_allowed = self.authorize(caller, owner, collection, record_key).await?;
        if requester == caller {
            return if caller_allowed {
                Ok(true)
            } else {
                Err(PearError::Unauthorized)
            };
        }
        if !caller_allowed && !self.shares_with_clique(caller, owner, collection, record_key)? {
            return Err(PearError::Unauthorized);
        }
        self.authorize(requester, owner, collection, record_key)
            .await
    }

    /// Whether `sharer` has told `owner` about records granted to the clique
    /// at `(owner, collection, record_key)`.
    fn shares_with_clique(
        &self,
        sharer: &Did,
        owner: &Did,
        collection: &str,
        record_key: &str,
    ) -> PearResult<bool> {
        if collection != CLIQUE_COLLECTION || record_key.is_empty() {
            return Ok(false);
        }
        let clique = RecordUri::clique(owner.clone(), record_key)?;
        Ok(self
            .inbox
            .get_clique_items(owner, &clique)?
            .iter()
            .any(|uri| &uri.owner == sharer))
    }

    /// The outgoing grants of `granter`, visible to the granter only.
    pub fn list_permission_grants(&self, caller: &Did, granter: &Did) -> PearResult<Vec<Permission>> {
        if caller != granter {
            return Err(PearError::Unauthorized);
        }
        self.repo.ensure_hosted(granter)?;
        self.permissions.list_permissions_by_owner(granter)
    }

    /// The caller's allowed grants keyed `collection` or `collection.recordKey`.
    pub fn list_permissions_by_lexicon(
        &self,
        caller: &Did,
    ) -> PearResult<BTreeMap<String, Vec<String>>> {
        self.repo.ensure_hosted(caller)?;
        self.permissions.list_read_permissions_by_lexicon(caller)
    }

    /// Addresses the caller was told about through `clique`.
    pub fn get_clique_items(&self, caller: &Did, clique: &RecordUri) -> PearResult<Vec<RecordUri>> {
        self.repo.ensure_hosted(caller)?;
        if !clique.is_clique() {
            return Err(PearError::InvalidInput(format!("{} is not a clique", clique)));
        }
        self.inbox.get_clique_items(caller, clique)
    }
}
