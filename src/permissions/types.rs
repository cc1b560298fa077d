use crate::grantee::{Did, Grantee};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome a permission row contributes when it is the decisive rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// A scoping rule as seen by [`super::resolve`]: which collection (or collection
/// pattern) and optional record key it covers, and its effect. Permission rows
/// and storage filters both reduce to this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRule {
    pub collection: String,
    pub record_key: Option<String>,
    pub effect: Effect,
}

impl ScopeRule {
    pub fn allow(collection: &str, record_key: Option<&str>) -> Self {
        Self {
            collection: collection.to_string(),
            record_key: record_key.map(str::to_string),
            effect: Effect::Allow,
        }
    }

    pub fn deny(collection: &str, record_key: Option<&str>) -> Self {
        Self {
            effect: Effect::Deny,
            ..Self::allow(collection, record_key)
        }
    }
}

/// The atomic grant unit. `record_key == None` grants the whole collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub grantee: Grantee,
    pub owner: Did,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_key: Option<String>,
    pub effect: Effect,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(
        grantee: Grantee,
        owner: Did,
        collection: &str,
        record_key: Option<&str>,
        effect: Effect,
    ) -> Self {
        Self {
            grantee,
            owner,
            collection: collection.to_string(),
            record_key: record_key.map(str::to_string),
            effect,
            created_at: Utc::now(),
        }
    }

    pub fn rule(&self) -> ScopeRule {
        ScopeRule {
            collection: self.collection.clone(),
            record_key: self.record_key.clone(),
            effect: self.effect,
        }
    }

    pub fn is_allow(&self) -> bool {
        self.effect == Effect::Allow
    }
}
