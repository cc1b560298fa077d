//! Node assembly: storage, signing key, identity directory, orchestrator and
//! the HTTP surface, wired from a [`NodeConfig`].

pub mod auth;
pub mod config;
pub mod http_server;

pub use auth::{CallerAuthenticator, CALLER_HEADER};
pub use config::{load_node_config, DirectoryEntry, HostedIdentityConfig, NodeConfig};
pub use http_server::{AppState, PearHttpServer};

use crate::db_operations::DbOperations;
use crate::error::{PearError, PearResult};
use crate::grantee::Did;
use crate::network::{DidDocument, HttpChannel, NodeSigner, StaticDirectory};
use crate::pear::Pear;
use crate::repo::HostedIdentity;
use crate::schema::SchemaRegistry;
use crate::{log_node_error, log_node_info};
use std::sync::Arc;

const SIGNING_KEY: &str = "signing_key";

/// A running node: one sled database, one signing key, one orchestrator.
#[derive(Clone)]
pub struct PearNode {
    config: NodeConfig,
    ops: DbOperations,
    pear: Pear,
    directory: Arc<StaticDirectory>,
    signer: Arc<NodeSigner>,
}

impl PearNode {
    /// Opens the database at the configured storage path and builds the node.
    pub fn new(config: NodeConfig) -> PearResult<Self> {
        let ops = DbOperations::open(&config.storage_path)?;
        Self::with_ops(config, ops)
    }

    pub fn with_ops(config: NodeConfig, ops: DbOperations) -> PearResult<Self> {
        let signer = Arc::new(load_or_create_signer(&ops)?);
        let directory = Arc::new(StaticDirectory::from_documents(
            config.directory.iter().map(DirectoryEntry::to_document),
        ));
        let channel = HttpChannel::new(
            directory.clone(),
            signer.clone(),
            config.pear_config().remote_timeout,
        )?;

        let mut pear = Pear::new(ops.clone(), Arc::new(channel), config.pear_config());
        if !config.schemas.is_empty() {
            pear = pear.with_validator(Arc::new(SchemaRegistry::from_schemas(
                config.schemas.clone(),
            )));
        }

        let node = Self {
            config,
            ops,
            pear,
            directory,
            signer,
        };
        for identity in node.pear.list_identities()? {
            node.publish(&identity);
        }
        for hosted in node.config.hosted_identities.clone() {
            node.host_identity(&hosted.did, hosted.handle.as_deref())?;
        }
        log_node_info!(
            "Node ready with {} hosted identities, public key {}",
            node.pear.list_identities()?.len(),
            node.signer.public_key_base64()
        );
        Ok(node)
    }

    /// Starts hosting `did` and publishes it in the node's directory.
    pub fn host_identity(&self, did: &Did, handle: Option<&str>) -> PearResult<HostedIdentity> {
        let identity = self.pear.create_identity(did, handle)?;
        self.publish(&identity);
        Ok(identity)
    }

    fn publish(&self, identity: &HostedIdentity) {
        let mut document = DidDocument::new(identity.did.clone(), &self.config.public_endpoint)
            .with_signing_key(&self.signer.public_key_base64());
        document.handle = identity.handle.clone();
        self.directory.insert(document);
    }

    pub fn pear(&self) -> &Pear {
        &self.pear
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn directory(&self) -> Arc<StaticDirectory> {
        self.directory.clone()
    }

    pub fn signer(&self) -> Arc<NodeSigner> {
        self.signer.clone()
    }

    pub fn authenticator(&self) -> CallerAuthenticator {
        CallerAuthenticator::new(
            self.directory.clone(),
            self.pear.repo().clone(),
            self.config.trust_caller_header,
        )
    }

    pub fn flush(&self) -> PearResult<()> {
        self.ops.flush()
    }

    /// Spawns the periodic outbox retry pass.
    pub fn spawn_outbox_retry(&self) -> tokio::task::JoinHandle<()> {
        let pear = self.pear.clone();
        let interval = self.config.outbox_retry_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = pear.retry_pending_notifications().await {
                    log_node_error!("Outbox retry pass failed: {}", e);
                }
            }
        })
    }
}

/// Loads the node's Ed25519 key, generating and storing one on first start.
fn load_or_create_signer(ops: &DbOperations) -> PearResult<NodeSigner> {
    match ops.node_keys_tree.get(SIGNING_KEY)? {
        Some(bytes) => {
            let bytes = <[u8; 32]>::try_from(&bytes[..])
                .map_err(|_| PearError::Config("stored node key is corrupt".to_string()))?;
            Ok(NodeSigner::from_bytes(&bytes))
        }
        None => {
            let signer = NodeSigner::generate();
            ops.node_keys_tree
                .insert(SIGNING_KEY, signer.to_bytes().to_vec())?;
            ops.flush()?;
            Ok(signer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::IdentityDirectory;
    use tempfile::tempdir;

    #[test]
    fn signing_key_survives_restart() {
        let dir = tempdir().unwrap();
        let config = NodeConfig::new(dir.path().join("db"));
        let first = {
            let node = PearNode::new(config.clone()).unwrap();
            node.flush().unwrap();
            node.signer().public_key_base64()
        };
        let node = PearNode::new(config).unwrap();
        assert_eq!(node.signer().public_key_base64(), first);
    }

    #[tokio::test]
    async fn hosted_identities_are_published() {
        let config = NodeConfig::default()
            .with_hosted_identity(Did::parse("did:plc:alice").unwrap(), Some("alice.example"));
        let node = PearNode::with_ops(config, DbOperations::temporary().unwrap()).unwrap();
        let alice = Did::parse("did:plc:alice").unwrap();

        assert!(node.pear().is_local(&alice).unwrap());
        let document = node.directory().lookup_did(&alice).await.unwrap();
        assert_eq!(document.pear_endpoint().unwrap(), "http://127.0.0.1:9001");
        assert_eq!(
            document.signing_key,
            Some(node.signer().public_key_base64())
        );
        assert_eq!(node.directory().lookup("alice.example").await.unwrap(), alice);
    }
}
