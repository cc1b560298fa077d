use super::Pear;
use crate::error::{PearError, PearResult};
use crate::grantee::{Did, Grantee, RecordUri, CLIQUE_COLLECTION};
use crate::network::XrpcRequest;
use crate::permissions::{decisive, is_allowed, Permission, ScopeRule, Specificity};
use crate::{log_orchestrator_debug, log_orchestrator_warn};
use serde_json::json;
use std::collections::BTreeMap;

impl Pear {
    /// Whether `caller` may read `(owner, collection, record_key)`; `owner`
    /// must be hosted here. An empty `record_key` asks about the collection.
    ///
    /// Rows granted to the caller directly are always considered. Rows granted
    /// to a clique count once the caller is shown to be a member. Only cliques
    /// whose rule is at least as specific as the best direct rule are
    /// resolved, all of them concurrently.
    pub(crate) async fn authorize(
        &self,
        caller: &Did,
        owner: &Did,
        collection: &str,
        record_key: &str,
    ) -> PearResult<bool> {
        if caller == owner {
            return Ok(true);
        }
        let rows = self.permissions.rules_for_record(owner, collection, record_key)?;
        let caller_grantee = Grantee::Identity(caller.clone());
        let mut effective: Vec<ScopeRule> = rows
            .iter()
            .filter(|row| row.grantee == caller_grantee)
            .map(Permission::rule)
            .collect();

        // Cliques are one level deep: membership rows are never clique rows.
        if collection != CLIQUE_COLLECTION {
            let floor = decisive(&effective, collection, record_key).map(Specificity::of);
            let mut by_clique: BTreeMap<&RecordUri, Vec<ScopeRule>> = BTreeMap::new();
            for row in &rows {
                let Some(clique) = row.grantee.as_clique() else {
                    continue;
                };
                let rule = row.rule();
                if floor.is_some_and(|floor| Specificity::of(&rule) < floor) {
                    continue;
                }
                by_clique.entry(clique).or_default().push(rule);
            }
            let memberships = futures::future::join_all(
                by_clique
                    .keys()
                    .map(|clique| self.is_clique_member(owner, caller, clique)),
            )
            .await;
            for ((_, rules), member) in by_clique.into_iter().zip(memberships) {
                if member? {
                    effective.extend(rules);
                }
            }
        }

        let allowed = is_allowed(&effective, collection, record_key);
        log_orchestrator_debug!(
            "authorize {} on {}/{}/{} = {}",
            caller,
            owner,
            collection,
            record_key,
            allowed
        );
        Ok(allowed)
    }

    /// Whether `member` is currently a member of `clique`.
    ///
    /// A local clique is answered from the permission store. A remote one is
    /// asked of its owner's node with `hasPermission` on the clique address,
    /// made as `asker`, a hosted identity: the member itself, or an owner
    /// whose grants name the clique. A permission rejection there means "not
    /// a member", while timeouts and transport failures propagate.
    pub(crate) async fn is_clique_member(
        &self,
        asker: &Did,
        member: &Did,
        clique: &RecordUri,
    ) -> PearResult<bool> {
        if self.is_local(&clique.owner)? {
            return self.permissions.has_permission(
                member,
                &clique.owner,
                CLIQUE_COLLECTION,
                &clique.record_key,
            );
        }
        let request = XrpcRequest::query(
            "pear.hasPermission",
            json!({
                "requester": member,
                "owner": clique.owner,
                "collection": CLIQUE_COLLECTION,
                "recordKey": clique.record_key,
            }),
        );
        match self.call_remote(asker, &clique.owner, request).await {
            Ok(body) => Ok(body
                .get("hasPermission")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)),
            Err(PearError::Unauthorized) => Ok(false),
            Err(e) => {
                log_orchestrator_warn!("membership of {} in {} unresolved: {}", member, clique, e);
                Err(e)
            }
        }
    }

    /// Current members of a clique hosted here: every identity its owner's
    /// rows resolve to allow on the clique address.
    pub(crate) fn local_clique_members(&self, clique: &RecordUri) -> PearResult<Vec<Did>> {
        let rows = self.permissions.rules_for_record(
            &clique.owner,
            CLIQUE_COLLECTION,
            &clique.record_key,
        )?;
        let mut by_member: BTreeMap<Did, Vec<ScopeRule>> = BTreeMap::new();
        for row in rows {
            if let Grantee::Identity(did) = &row.grantee {
                by_member.entry(did.clone()).or_default().push(row.rule());
            }
        }
        Ok(by_member
            .into_iter()
            .filter(|(_, rules)| is_allowed(rules, CLIQUE_COLLECTION, &clique.record_key))
            .map(|(did, _)| did)
            .collect())
    }
}
