//! The federated access orchestrator.
//!
//! [`Pear`] is the only component that makes authorization decisions. Every
//! public operation takes the authenticated caller and fails closed: store
//! errors propagate, and a missing rule denies. Cross-node work goes through
//! an [`XrpcChannel`] under a bounded timeout, so a slow remote node surfaces
//! as [`PearError::RemoteTimeout`] rather than as a denial.
//!
//! ```rust,no_run
//! use pear::db_operations::DbOperations;
//! use pear::grantee::{Did, Grantee};
//! use pear::network::LoopbackNetwork;
//! use pear::pear::{NewRecord, Pear, PearConfig};
//! use serde_json::json;
//!
//! # async fn demo() -> pear::error::PearResult<()> {
//! let network = LoopbackNetwork::new();
//! let node = Pear::new(DbOperations::temporary()?, network.clone(), PearConfig::default());
//! let alice = Did::parse("did:plc:alice")?;
//! node.create_identity(&alice, Some("alice.example"))?;
//! network.register(&node);
//!
//! let bob = Grantee::parse("did:plc:bob")?;
//! node.put_record(
//!     &alice,
//!     &alice,
//!     NewRecord::new("app.posts", json!({"text": "hi"})).with_key("p1"),
//!     false,
//!     &[bob],
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

mod authorize;
mod notify;
mod permissions;
mod records;

pub use notify::RetryReport;
pub use records::NewRecord;

use crate::db_operations::DbOperations;
use crate::error::{PearError, PearResult};
use crate::grantee::Did;
use crate::inbox::{Inbox, Outbox};
use crate::log_network_warn;
use crate::network::{XrpcChannel, XrpcRequest};
use crate::permissions::PermissionStore;
use crate::repo::{HostedIdentity, Repository};
use crate::schema::RecordValidator;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for cross-node work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PearConfig {
    /// Deadline for any single cross-node call
    pub remote_timeout: Duration,
    /// Remote records fetched concurrently while listing
    pub list_fetch_concurrency: usize,
    /// Delivery attempts before a pending notification is dropped
    pub outbox_max_attempts: u32,
}

impl Default for PearConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_millis(5000),
            list_fetch_concurrency: 8,
            outbox_max_attempts: 20,
        }
    }
}

/// The authorization-enforcing façade over the local stores and the channel.
///
/// Cloning is cheap and every clone shares the same stores; there is no
/// in-process lock, concurrent requests rely on sled's own atomicity.
#[derive(Clone)]
pub struct Pear {
    repo: Repository,
    permissions: PermissionStore,
    inbox: Inbox,
    outbox: Outbox,
    channel: Arc<dyn XrpcChannel>,
    validator: Option<Arc<dyn RecordValidator>>,
    config: PearConfig,
}

impl Pear {
    pub fn new(ops: DbOperations, channel: Arc<dyn XrpcChannel>, config: PearConfig) -> Self {
        Self {
            repo: Repository::new(ops.clone()),
            permissions: PermissionStore::new(ops.clone()),
            inbox: Inbox::new(ops.clone()),
            outbox: Outbox::new(ops),
            channel,
            validator: None,
            config,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn RecordValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn permissions(&self) -> &PermissionStore {
        &self.permissions
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn config(&self) -> &PearConfig {
        &self.config
    }

    /// Starts hosting `did` on this node.
    pub fn create_identity(&self, did: &Did, handle: Option<&str>) -> PearResult<HostedIdentity> {
        self.repo.create_identity(did, handle)
    }

    pub fn list_identities(&self) -> PearResult<Vec<HostedIdentity>> {
        self.repo.list_identities()
    }

    pub fn is_local(&self, did: &Did) -> PearResult<bool> {
        self.repo.is_hosted(did)
    }

    /// Sends `request` to the node hosting `receiver` as `sender`, bounded by
    /// the configured timeout. Returns the response body.
    pub(crate) async fn call_remote(
        &self,
        sender: &Did,
        receiver: &Did,
        request: XrpcRequest,
    ) -> PearResult<Value> {
        let method = request.method.clone();
        match tokio::time::timeout(
            self.config.remote_timeout,
            self.channel.send_xrpc(sender, receiver, request),
        )
        .await
        {
            Ok(Ok(response)) => Ok(response.body),
            Ok(Err(e)) => {
                log_network_warn!("{} to {} failed: {}", method, receiver, e);
                Err(PearError::from(e))
            }
            Err(_) => {
                log_network_warn!(
                    "{} to {} timed out after {:?}",
                    method,
                    receiver,
                    self.config.remote_timeout
                );
                Err(PearError::RemoteTimeout(format!(
                    "{} to {} exceeded {:?}",
                    method, receiver, self.config.remote_timeout
                )))
            }
        }
    }
}
