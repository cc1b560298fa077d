use super::Notification;
use crate::db_operations::DbOperations;
use crate::error::PearResult;
use crate::grantee::Did;
use crate::log_inbox_warn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An outbound notification that could not be delivered yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotification {
    pub id: String,
    /// Identity the delivery call is made as.
    pub caller: Did,
    /// Identity whose node receives the call.
    pub receiver: Did,
    pub notification: Notification,
    pub attempts: u32,
    pub last_error: String,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
}

impl PendingNotification {
    pub fn new(caller: Did, receiver: Did, notification: Notification, error: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            caller,
            receiver,
            notification,
            attempts: 1,
            last_error: error,
            created_at: now,
            last_attempt_at: now,
        }
    }
}

/// Durable queue of undelivered notifications, retried until delivered or
/// out of attempts. Delivery is at-least-once; receivers upsert.
#[derive(Clone)]
pub struct Outbox {
    ops: DbOperations,
}

impl Outbox {
    pub fn new(ops: DbOperations) -> Self {
        Self { ops }
    }

    pub fn enqueue(&self, pending: &PendingNotification) -> PearResult<()> {
        log_inbox_warn!(
            "queueing notification for {} about {}/{}: {}",
            pending.receiver,
            pending.notification.collection,
            pending.notification.record_key,
            pending.last_error
        );
        self.ops
            .store_in_tree(&self.ops.outbox_tree, &pending.id, pending)
    }

    pub fn pending(&self) -> PearResult<Vec<PendingNotification>> {
        Ok(self
            .ops
            .scan_prefix_in_tree::<PendingNotification>(&self.ops.outbox_tree, "")?
            .into_iter()
            .map(|(_, pending)| pending)
            .collect())
    }

    pub fn remove(&self, id: &str) -> PearResult<bool> {
        self.ops.delete_from_tree(&self.ops.outbox_tree, id)
    }

    /// Records another failed attempt and returns the updated entry.
    pub fn record_failure(
        &self,
        mut pending: PendingNotification,
        error: String,
    ) -> PearResult<PendingNotification> {
        pending.attempts += 1;
        pending.last_error = error;
        pending.last_attempt_at = Utc::now();
        self.ops
            .store_in_tree(&self.ops.outbox_tree, &pending.id, &pending)?;
        Ok(pending)
    }

    pub fn len(&self) -> usize {
        self.ops.outbox_tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.outbox_tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_accumulate_until_removed() {
        let outbox = Outbox::new(DbOperations::temporary().unwrap());
        let alice = Did::parse("did:plc:alice").unwrap();
        let bob = Did::parse("did:plc:bob").unwrap();
        let pending = PendingNotification::new(
            alice.clone(),
            bob.clone(),
            Notification {
                sender: alice,
                recipient: bob,
                collection: "app.posts".to_string(),
                record_key: "p1".to_string(),
                clique: None,
            },
            "connection refused".to_string(),
        );
        outbox.enqueue(&pending).unwrap();
        assert_eq!(outbox.len(), 1);

        let retried = outbox
            .record_failure(pending.clone(), "timeout".to_string())
            .unwrap();
        assert_eq!(retried.attempts, 2);
        assert_eq!(outbox.pending().unwrap()[0].last_error, "timeout");

        assert!(outbox.remove(&pending.id).unwrap());
        assert!(outbox.is_empty());
    }
}
