//! # Pear
//!
//! A federated personal-data node. Each node hosts one or more identities,
//! stores their records, and decides who may read them through owner-managed
//! read grants. A grant names an identity or a clique (a group defined by
//! grants on a clique record), and may cover a single record, a collection or
//! a collection pattern.
//!
//! Nodes talk to each other over XRPC: when an owner grants access, the
//! grantee's node receives an update notification in its inbox, and later
//! fetches the record from the owner's node on the grantee's behalf.
//!
//! ## Main components
//!
//! * [`repo`] - per-identity record and blob storage
//! * [`permissions`] - grant rows and rule resolution
//! * [`inbox`] - update notifications received from other nodes, and the
//!   outbox of deliveries still to retry
//! * [`pear`] - the orchestrator tying storage, permissions and network together
//! * [`network`] - identity directory, signed service assertions and channels
//! * [`rpc`] - the JSON method surface shared by every transport
//! * [`pear_node`] - node assembly, configuration and the HTTP server

pub mod db_operations;
pub mod error;
pub mod grantee;
pub mod inbox;
pub mod logging;
pub mod network;
pub mod pear;
pub mod pear_node;
pub mod permissions;
pub mod repo;
pub mod rpc;
pub mod schema;

pub use db_operations::DbOperations;
pub use error::{PearError, PearResult};
pub use grantee::{Did, Grantee, RecordUri, CLIQUE_COLLECTION};
pub use inbox::Notification;
pub use network::LoopbackNetwork;
pub use pear::{NewRecord, Pear, PearConfig, RetryReport};
pub use pear_node::{load_node_config, NodeConfig, PearHttpServer, PearNode};
pub use permissions::{Effect, Permission};
