//! Identity directory: resolves identities to their node's service endpoint
//! and signing key.

use super::error::{ChannelError, ChannelResult};
use crate::grantee::Did;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Service name under which a node's XRPC endpoint is published.
pub const PEAR_SERVICE: &str = "pear";

/// What the directory knows about one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    pub did: Did,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    /// Service endpoints by name
    #[serde(default)]
    pub services: HashMap<String, String>,
    /// Base64 Ed25519 public key of the node hosting this identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

impl DidDocument {
    pub fn new(did: Did, endpoint: &str) -> Self {
        let mut services = HashMap::new();
        services.insert(PEAR_SERVICE.to_string(), endpoint.to_string());
        Self {
            did,
            handle: None,
            services,
            signing_key: None,
        }
    }

    pub fn with_handle(mut self, handle: &str) -> Self {
        self.handle = Some(handle.to_string());
        self
    }

    pub fn with_signing_key(mut self, key: &str) -> Self {
        self.signing_key = Some(key.to_string());
        self
    }

    /// The node endpoint serving this identity.
    pub fn pear_endpoint(&self) -> ChannelResult<&str> {
        self.services
            .get(PEAR_SERVICE)
            .map(String::as_str)
            .ok_or_else(|| {
                ChannelError::LookupFailed(format!("{} publishes no pear endpoint", self.did))
            })
    }

    pub fn verifying_key(&self) -> ChannelResult<VerifyingKey> {
        let encoded = self.signing_key.as_deref().ok_or_else(|| {
            ChannelError::LookupFailed(format!("{} publishes no signing key", self.did))
        })?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| ChannelError::LookupFailed(format!("bad signing key: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChannelError::LookupFailed("signing key must be 32 bytes".to_string()))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| ChannelError::LookupFailed(format!("bad signing key: {}", e)))
    }
}

/// Resolves identities to node endpoints.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn lookup_did(&self, did: &Did) -> ChannelResult<DidDocument>;

    /// Resolves a handle or DID string to an identity.
    async fn lookup(&self, handle_or_did: &str) -> ChannelResult<Did>;
}

/// Directory backed by a fixed table, filled from configuration.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    entries: RwLock<HashMap<Did, DidDocument>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: impl IntoIterator<Item = DidDocument>) -> Self {
        let directory = Self::new();
        for document in documents {
            directory.insert(document);
        }
        directory
    }

    pub fn insert(&self, document: DidDocument) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(document.did.clone(), document);
    }

    pub fn get(&self, did: &Did) -> Option<DidDocument> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(did).cloned()
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn lookup_did(&self, did: &Did) -> ChannelResult<DidDocument> {
        self.get(did)
            .ok_or_else(|| ChannelError::LookupFailed(format!("unknown identity {}", did)))
    }

    async fn lookup(&self, handle_or_did: &str) -> ChannelResult<Did> {
        if let Ok(did) = Did::parse(handle_or_did) {
            return Ok(did);
        }
        let handle = handle_or_did.trim_start_matches('@');
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .find(|doc| doc.handle.as_deref() == Some(handle))
            .map(|doc| doc.did.clone())
            .ok_or_else(|| ChannelError::LookupFailed(format!("unknown handle {}", handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_dids_and_handles() {
        let bob = Did::parse("did:plc:bob").unwrap();
        let directory = StaticDirectory::from_documents([
            DidDocument::new(bob.clone(), "http://node-b:8080").with_handle("bob.example")
        ]);

        let doc = directory.lookup_did(&bob).await.unwrap();
        assert_eq!(doc.pear_endpoint().unwrap(), "http://node-b:8080");
        assert_eq!(directory.lookup("@bob.example").await.unwrap(), bob);
        assert_eq!(directory.lookup("did:plc:bob").await.unwrap(), bob);
        assert!(directory.lookup("carol.example").await.is_err());
        assert!(directory
            .lookup_did(&Did::parse("did:plc:carol").unwrap())
            .await
            .is_err());
    }

    #[test]
    fn missing_signing_key_is_a_lookup_failure() {
        let doc = DidDocument::new(Did::parse("did:plc:bob").unwrap(), "http://b");
        assert!(matches!(
            doc.verifying_key(),
            Err(ChannelError::LookupFailed(_))
        ));
    }
}
