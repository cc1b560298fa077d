use crate::grantee::{Did, RecordUri};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored record. `(owner, collection, record_key)` is unique; writes to
/// the same address replace the value (last write wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub uri: RecordUri,
    pub owner: Did,
    pub collection: String,
    pub record_key: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blobs: Vec<BlobRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reference to a content-addressed blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRef {
    /// `sha256-<hex digest of the bytes>`
    pub cid: String,
    pub mime_type: String,
    pub size: u64,
}

/// An identity whose records live on this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedIdentity {
    pub did: Did,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub created_at: DateTime<Utc>,
}
