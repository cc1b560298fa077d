//! Shared fixtures for the integration tests: nodes wired together over an
//! in-process loopback network.

#![allow(dead_code)]

use pear::network::{DidDocument, LoopbackNetwork, NodeSigner, StaticDirectory};
use pear::pear_node::CallerAuthenticator;
use pear::{DbOperations, Did, Pear, PearConfig};
use std::sync::Arc;
use std::time::Duration;

pub fn did(value: &str) -> Did {
    Did::parse(value).expect("valid test DID")
}

/// A node hosting `hosted`, registered on `network`.
pub fn node(network: &Arc<LoopbackNetwork>, hosted: &[&str]) -> Pear {
    node_with_config(network, hosted, PearConfig::default())
}

pub fn node_with_config(
    network: &Arc<LoopbackNetwork>,
    hosted: &[&str],
    config: PearConfig,
) -> Pear {
    let pear = Pear::new(
        DbOperations::temporary().expect("temporary database"),
        network.clone(),
        config,
    );
    for identity in hosted {
        pear.create_identity(&did(identity), None)
            .expect("create identity");
    }
    network.register(&pear);
    pear
}

/// A node hosting `hosted` that signs its requests and verifies its
/// callers' assertions against `directory`, where its identities are
/// published with its key.
pub fn signed_node(
    network: &Arc<LoopbackNetwork>,
    directory: &Arc<StaticDirectory>,
    hosted: &[&str],
) -> Pear {
    let pear = Pear::new(
        DbOperations::temporary().expect("temporary database"),
        network.clone(),
        PearConfig::default(),
    );
    let signer = Arc::new(NodeSigner::generate());
    for identity in hosted {
        pear.create_identity(&did(identity), None)
            .expect("create identity");
        directory.insert(
            DidDocument::new(did(identity), "loopback")
                .with_signing_key(&signer.public_key_base64()),
        );
    }
    let authenticator = CallerAuthenticator::new(directory.clone(), pear.repo().clone(), false);
    network.register_signed(&pear, signer, authenticator);
    pear
}

/// Config with a short remote deadline, for tests that stall a node.
pub fn impatient() -> PearConfig {
    PearConfig {
        remote_timeout: Duration::from_millis(50),
        ..PearConfig::default()
    }
}

/// Routes `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
