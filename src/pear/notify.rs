use super::Pear;
use crate::error::{PearError, PearResult};
use crate::grantee::{Did, Grantee, RecordUri, CLIQUE_COLLECTION};
use crate::inbox::{InboxEntry, Notification, PendingNotification};
use crate::network::XrpcRequest;
use crate::permissions::ScopeRule;
use crate::{log_inbox_error, log_orchestrator_debug, log_orchestrator_info};
use serde::Serialize;

/// One notification to deliver: made as `caller`, to the node of `target`.
struct Delivery {
    caller: Did,
    target: Did,
    notification: Notification,
}

/// Outcome of one outbox retry pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub delivered: usize,
    pub retrying: usize,
    pub dropped: usize,
}

fn notify_request(notification: &Notification) -> PearResult<XrpcRequest> {
    Ok(XrpcRequest::procedure(
        "pear.notifyOfUpdate",
        serde_json::to_value(notification)?,
    ))
}

impl Pear {
    /// Accepts a notification for a hosted recipient.
    ///
    /// The caller must be the sender, or the owner of the named clique
    /// relaying on the sender's behalf to one of the clique's members. When
    /// the recipient owns the named clique, the notification is passed on to
    /// the clique's members.
    pub async fn notify_of_update(
        &self,
        caller: &Did,
        notification: Notification,
    ) -> PearResult<InboxEntry> {
        self.repo.ensure_hosted(&notification.recipient)?;
        if let Some(clique) = &notification.clique {
            if !clique.is_clique() {
                return Err(PearError::InvalidInput(format!("{} is not a clique", clique)));
            }
        }
        if caller != &notification.sender {
            let Some(clique) = notification
                .clique
                .as_ref()
                .filter(|clique| &clique.owner == caller)
            else {
                return Err(PearError::Unauthorized);
            };
            let recipient = &notification.recipient;
            if !self.is_clique_member(recipient, recipient, clique).await? {
                log_orchestrator_debug!(
                    "{} relayed to {}, who is not in {}",
                    caller,
                    recipient,
                    clique
                );
                return Err(PearError::Unauthorized);
            }
        }

        let entry = self.inbox.put(notification.clone())?;
        if let Some(clique) = notification.clique.clone() {
            if clique.owner == notification.recipient && notification.sender != clique.owner {
                self.relay_to_members(&clique, &notification).await?;
            }
        }
        Ok(entry)
    }

    /// Passes a notification received by a clique owner on to its members.
    async fn relay_to_members(&self, clique: &RecordUri, notification: &Notification) -> PearResult<()> {
        let mut deliveries = Vec::new();
        for member in self.local_clique_members(clique)? {
            if member == notification.sender || member == clique.owner {
                continue;
            }
            let relayed = Notification {
                recipient: member.clone(),
                ..notification.clone()
            };
            if self.is_local(&member)? {
                self.inbox.put(relayed)?;
            } else {
                deliveries.push(Delivery {
                    caller: clique.owner.clone(),
                    target: member,
                    notification: relayed,
                });
            }
        }
        log_orchestrator_debug!(
            "relaying {}/{} through {} to {} member(s)",
            notification.collection,
            notification.record_key,
            clique,
            deliveries.len()
        );
        self.deliver_all(deliveries).await;
        Ok(())
    }

    /// Tells every grantee hosted elsewhere about the records a grant on
    /// `(owner, collection, record_key)` made visible to it.
    ///
    /// A local clique is expanded to its non-local members; a remote clique's
    /// owner is told and relays. A grant on a clique address makes the new
    /// members aware of the clique and of everything already granted to it.
    pub(crate) async fn notify_grantees(
        &self,
        owner: &Did,
        grantees: &[Grantee],
        collection: &str,
        record_key: Option<&str>,
    ) -> PearResult<()> {
        let addresses = self.granted_addresses(owner, collection, record_key)?;
        let mut deliveries = Vec::new();
        for grantee in grantees {
            match grantee {
                Grantee::Identity(did) => {
                    if self.is_local(did)? {
                        continue;
                    }
                    for (collection, key) in &addresses {
                        deliveries.push(Delivery {
                            caller: owner.clone(),
                            target: did.clone(),
                            notification: Notification {
                                sender: owner.clone(),
                                recipient: did.clone(),
                                collection: collection.clone(),
                                record_key: key.clone(),
                                clique: None,
                            },
                        });
                    }
                    match record_key {
                        Some(clique_key) if collection == CLIQUE_COLLECTION => {
                            let clique = RecordUri::clique(owner.clone(), clique_key)?;
                            deliveries.extend(self.clique_backlog(&clique, did)?);
                        }
                        _ => {}
                    }
                }
                Grantee::Clique(clique) => {
                    let targets = if self.is_local(&clique.owner)? {
                        let mut members = Vec::new();
                        for member in self.local_clique_members(clique)? {
                            if &member != owner && !self.is_local(&member)? {
                                members.push(member);
                            }
                        }
                        members
                    } else {
                        vec![clique.owner.clone()]
                    };
                    for target in targets {
                        for (collection, key) in &addresses {
                            deliveries.push(Delivery {
                                caller: owner.clone(),
                                target: target.clone(),
                                notification: Notification {
                                    sender: owner.clone(),
                                    recipient: target.clone(),
                                    collection: collection.clone(),
                                    record_key: key.clone(),
                                    clique: Some(clique.clone()),
                                },
                            });
                        }
                    }
                }
            }
        }
        self.deliver_all(deliveries).await;
        Ok(())
    }

    /// `(collection, key)` pairs a grant covers: the named record, or every
    /// existing record of `owner` matching the collection pattern.
    fn granted_addresses(
        &self,
        owner: &Did,
        collection: &str,
        record_key: Option<&str>,
    ) -> PearResult<Vec<(String, String)>> {
        Ok(match record_key {
            Some(key) => vec![(collection.to_string(), key.to_string())],
            None => self
                .repo
                .list_records(owner, collection, &[ScopeRule::allow("*", None)])?
                .into_iter()
                .map(|record| (record.collection, record.record_key))
                .collect(),
        })
    }

    /// Notifications telling `member` about every local record already
    /// granted to `clique`.
    fn clique_backlog(&self, clique: &RecordUri, member: &Did) -> PearResult<Vec<Delivery>> {
        let mut deliveries = Vec::new();
        for row in self
            .permissions
            .list_grants_to(&Grantee::Clique(clique.clone()), "")?
        {
            if !row.is_allow() || !self.is_local(&row.owner)? {
                continue;
            }
            for (collection, key) in
                self.granted_addresses(&row.owner, &row.collection, row.record_key.as_deref())?
            {
                deliveries.push(Delivery {
                    caller: row.owner.clone(),
                    target: member.clone(),
                    notification: Notification {
                        sender: row.owner.clone(),
                        recipient: member.clone(),
                        collection,
                        record_key: key,
                        clique: Some(clique.clone()),
                    },
                });
            }
        }
        Ok(deliveries)
    }

    async fn deliver_all(&self, deliveries: Vec<Delivery>) {
        futures::future::join_all(
            deliveries
                .into_iter()
                .map(|delivery| self.deliver(delivery)),
        )
        .await;
    }

    /// Sends one notification; a retryable failure lands in the outbox.
    async fn deliver(&self, delivery: Delivery) {
        let outcome = match notify_request(&delivery.notification) {
            Ok(request) => {
                self.call_remote(&delivery.caller, &delivery.target, request)
                    .await
            }
            Err(e) => Err(e),
        };
        match outcome {
            Ok(_) => log_orchestrator_debug!(
                "notified {} about {}/{}",
                delivery.target,
                delivery.notification.collection,
                delivery.notification.record_key
            ),
            Err(e) if e.is_retryable() => {
                let pending = PendingNotification::new(
                    delivery.caller,
                    delivery.target,
                    delivery.notification,
                    e.to_string(),
                );
                if let Err(store_error) = self.outbox.enqueue(&pending) {
                    log_inbox_error!("cannot queue notification {}: {}", pending.id, store_error);
                }
            }
            Err(e) => log_inbox_error!(
                "{} rejected notification about {}/{}: {}",
                delivery.target,
                delivery.notification.collection,
                delivery.notification.record_key,
                e
            ),
        }
    }

    /// Redelivers queued notifications once. Entries are removed when
    /// delivered, when the receiver rejects them outright, or when they run
    /// out of attempts.
    pub async fn retry_pending_notifications(&self) -> PearResult<RetryReport> {
        let mut report = RetryReport::default();
        for pending in self.outbox.pending()? {
            let request = notify_request(&pending.notification)?;
            match self
                .call_remote(&pending.caller, &pending.receiver, request)
                .await
            {
                Ok(_) => {
                    self.outbox.remove(&pending.id)?;
                    report.delivered += 1;
                }
                Err(e)
                    if !e.is_retryable()
                        || pending.attempts + 1 >= self.config.outbox_max_attempts =>
                {
                    log_inbox_error!(
                        "dropping notification {} for {} after {} attempt(s): {}",
                        pending.id,
                        pending.receiver,
                        pending.attempts + 1,
                        e
                    );
                    self.outbox.remove(&pending.id)?;
                    report.dropped += 1;
                }
                Err(e) => {
                    self.outbox.record_failure(pending, e.to_string())?;
                    report.retrying += 1;
                }
            }
        }
        if report != RetryReport::default() {
            log_orchestrator_info!(
                "outbox pass: {} delivered, {} retrying, {} dropped",
                report.delivered,
                report.retrying,
                report.dropped
            );
        }
        Ok(report)
    }
}
