//! Inbox: durable index of "you were told about record X" notifications.
//!
//! Rows are unique per `(sender, recipient, collection, record key)`;
//! re-notifying only refreshes `updated_at`. Rows never expire.

mod outbox;

pub use outbox::{Outbox, PendingNotification};

use crate::db_operations::{compose_key, prefix_key, DbOperations};
use crate::error::PearResult;
use crate::grantee::{
    is_wildcard_collection, validate_collection, validate_record_key, Did, RecordUri,
};
use crate::permissions::collection_matches;
use crate::log_inbox_debug;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A notification as sent between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub sender: Did,
    pub recipient: Did,
    pub collection: String,
    pub record_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clique: Option<RecordUri>,
}

impl Notification {
    /// Address of the record this notification is about.
    pub fn record_uri(&self) -> PearResult<RecordUri> {
        RecordUri::new(self.sender.clone(), &self.collection, &self.record_key)
    }
}

/// A notification as stored in the inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
    #[serde(flatten)]
    pub notification: Notification,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Inbox {
    ops: DbOperations,
}

impl Inbox {
    pub fn new(ops: DbOperations) -> Self {
        Self { ops }
    }

    fn key(notification: &Notification) -> PearResult<String> {
        compose_key(&[
            notification.recipient.as_str(),
            &notification.collection,
            notification.sender.as_str(),
            &notification.record_key,
        ])
    }

    /// Idempotent upsert keyed by `(sender, recipient, collection, record key)`.
    /// A clique, once recorded on a row, stays.
    pub fn put(&self, mut notification: Notification) -> PearResult<InboxEntry> {
        validate_collection(&notification.collection)?;
        validate_record_key(&notification.record_key)?;
        let key = Self::key(&notification)?;
        let now = Utc::now();
        let created_at = match self
            .ops
            .get_from_tree::<InboxEntry>(&self.ops.inbox_tree, &key)?
        {
            Some(existing) => {
                if existing.notification.clique.is_some() {
                    notification.clique = existing.notification.clique;
                }
                existing.created_at
            }
            None => now,
        };
        let entry = InboxEntry {
            notification,
            created_at,
            updated_at: now,
        };
        self.ops.store_in_tree(&self.ops.inbox_tree, &key, &entry)?;
        log_inbox_debug!(
            "inbox {} <- {}/{}/{}",
            entry.notification.recipient,
            entry.notification.sender,
            entry.notification.collection,
            entry.notification.record_key
        );
        Ok(entry)
    }

    /// Addresses of records `recipient` was told about through `clique`.
    pub fn get_clique_items(&self, recipient: &Did, clique: &RecordUri) -> PearResult<Vec<RecordUri>> {
        let mut uris = self
            .entries_for(recipient)?
            .into_iter()
            .filter(|entry| entry.notification.clique.as_ref() == Some(clique))
            .map(|entry| entry.notification.record_uri())
            .collect::<PearResult<Vec<_>>>()?;
        uris.sort();
        uris.dedup();
        Ok(uris)
    }

    /// Notifications addressed to `recipient` about records in `collection`,
    /// which may be a wildcard pattern.
    pub fn get_collection_updates_by_recipient(
        &self,
        recipient: &Did,
        collection: &str,
    ) -> PearResult<Vec<Notification>> {
        validate_collection(collection)?;
        let prefix = if is_wildcard_collection(collection) {
            prefix_key(&[recipient.as_str()])?
        } else {
            prefix_key(&[recipient.as_str(), collection])?
        };
        Ok(self
            .ops
            .scan_prefix_in_tree::<InboxEntry>(&self.ops.inbox_tree, &prefix)?
            .into_iter()
            .map(|(_, entry)| entry.notification)
            .filter(|notification| collection_matches(collection, &notification.collection))
            .collect())
    }

    /// Every inbox entry addressed to `recipient`.
    pub fn entries_for(&self, recipient: &Did) -> PearResult<Vec<InboxEntry>> {
        let prefix = prefix_key(&[recipient.as_str()])?;
        Ok(self
            .ops
            .scan_prefix_in_tree::<InboxEntry>(&self.ops.inbox_tree, &prefix)?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }
}
