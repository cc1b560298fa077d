//! Caller authentication at the HTTP edge.
//!
//! A request is made as the identity named by a verified service assertion.
//! Failing that, and only when the node is configured to trust a fronting
//! auth layer, the `X-Pear-Caller` header names the caller. Anything else is
//! unauthenticated.

use crate::error::{PearError, PearResult};
use crate::grantee::Did;
use crate::network::{IdentityDirectory, ServiceAssertion};
use crate::repo::Repository;
use crate::rpc::XrpcMethod;
use crate::log_http_warn;
use std::sync::Arc;

/// Header a fronting auth layer uses to name the verified caller.
pub const CALLER_HEADER: &str = "X-Pear-Caller";

fn unauthenticated(error: impl std::fmt::Display) -> PearError {
    PearError::Unauthenticated(error.to_string())
}

pub struct CallerAuthenticator {
    directory: Arc<dyn IdentityDirectory>,
    repo: Repository,
    trust_caller_header: bool,
}

impl CallerAuthenticator {
    pub fn new(
        directory: Arc<dyn IdentityDirectory>,
        repo: Repository,
        trust_caller_header: bool,
    ) -> Self {
        Self {
            directory,
            repo,
            trust_caller_header,
        }
    }

    /// Resolves the caller of `method` from the `Authorization` and
    /// caller headers.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        caller_header: Option<&str>,
        method: XrpcMethod,
    ) -> PearResult<Did> {
        if let Some(token) = authorization.and_then(|value| value.strip_prefix("Bearer ")) {
            return self.verify_assertion(token.trim(), method).await.map_err(|e| {
                log_http_warn!("rejected service assertion for {}: {}", method.name(), e);
                e
            });
        }
        match caller_header {
            Some(value) if self.trust_caller_header => Did::parse(value.trim())
                .map_err(|_| PearError::Unauthenticated(format!("bad {} header", CALLER_HEADER))),
            _ => Err(PearError::Unauthenticated("no credentials".to_string())),
        }
    }

    /// The issuer's own published key must have signed the assertion, so a
    /// node can only speak for identities published with its key.
    async fn verify_assertion(&self, token: &str, method: XrpcMethod) -> PearResult<Did> {
        let token = ServiceAssertion::decode(token).map_err(unauthenticated)?;
        let document = self
            .directory
            .lookup_did(&token.claims.iss)
            .await
            .map_err(unauthenticated)?;
        let key = document.verifying_key().map_err(unauthenticated)?;
        let claims = token
            .verify(&key, method.name())
            .map_err(unauthenticated)?;

        if !self.repo.is_hosted(&claims.aud)? {
            return Err(PearError::Unauthenticated(format!(
                "assertion audience {} is not hosted here",
                claims.aud
            )));
        }
        Ok(claims.iss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_operations::DbOperations;
    use crate::network::service_auth::seal;
    use crate::network::{DidDocument, NodeSigner, StaticDirectory};

    fn did(s: &str) -> Did {
        Did::parse(s).unwrap()
    }

    struct Fixture {
        auth: CallerAuthenticator,
        remote: NodeSigner,
        mallory: NodeSigner,
    }

    /// Bob is hosted here; alice and carol live on a node with key `remote`,
    /// mallory on a node of its own.
    fn fixture(trust_caller_header: bool) -> Fixture {
        let repo = Repository::new(DbOperations::temporary().unwrap());
        repo.create_identity(&did("did:plc:bob"), None).unwrap();
        let remote = NodeSigner::generate();
        let mallory = NodeSigner::generate();
        let directory = StaticDirectory::from_documents([
            DidDocument::new(did("did:plc:alice"), "http://remote")
                .with_signing_key(&remote.public_key_base64()),
            DidDocument::new(did("did:plc:carol"), "http://remote")
                .with_signing_key(&remote.public_key_base64()),
            DidDocument::new(did("did:plc:bob"), "http://local")
                .with_signing_key(&NodeSigner::generate().public_key_base64()),
            DidDocument::new(did("did:plc:mallory"), "http://mallory")
                .with_signing_key(&mallory.public_key_base64()),
        ]);
        Fixture {
            auth: CallerAuthenticator::new(Arc::new(directory), repo, trust_caller_header),
            remote,
            mallory,
        }
    }

    fn bearer(assertion: ServiceAssertion, signer: &NodeSigner) -> String {
        format!("Bearer {}", assertion.sign(signer).unwrap())
    }

    #[tokio::test]
    async fn accepts_assertions_signed_by_the_issuers_node() {
        let f = fixture(false);
        let header = bearer(
            ServiceAssertion::new(did("did:plc:alice"), did("did:plc:bob"), "pear.notifyOfUpdate"),
            &f.remote,
        );
        let caller = f
            .auth
            .authenticate(Some(&header), None, XrpcMethod::NotifyOfUpdate)
            .await
            .unwrap();
        assert_eq!(caller, did("did:plc:alice"));
    }

    #[tokio::test]
    async fn rejects_foreign_keys_wrong_audience_and_wrong_method() {
        let f = fixture(false);
        let forged = bearer(
            ServiceAssertion::new(did("did:plc:alice"), did("did:plc:bob"), "pear.getRecord"),
            &NodeSigner::generate(),
        );
        assert!(f
            .auth
            .authenticate(Some(&forged), None, XrpcMethod::GetRecord)
            .await
            .is_err());

        let elsewhere = bearer(
            ServiceAssertion::new(did("did:plc:alice"), did("did:plc:carol"), "pear.getRecord"),
            &f.remote,
        );
        assert!(f
            .auth
            .authenticate(Some(&elsewhere), None, XrpcMethod::GetRecord)
            .await
            .is_err());

        let other_method = bearer(
            ServiceAssertion::new(did("did:plc:alice"), did("did:plc:bob"), "pear.getRecord"),
            &f.remote,
        );
        let err = f
            .auth
            .authenticate(Some(&other_method), None, XrpcMethod::PutRecord)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn another_nodes_key_cannot_speak_for_a_hosted_identity() {
        let f = fixture(false);
        // Mallory's node publishes its own key and claims to relay for bob.
        let claims = serde_json::json!({
            "iss": "did:plc:bob",
            "aud": "did:plc:bob",
            "lxm": "pear.getRecord",
            "exp": chrono::Utc::now().timestamp() + 60,
            "nonce": "n1",
            "via": "did:plc:mallory",
        });
        let token = seal(&serde_json::to_vec(&claims).unwrap(), &f.mallory);
        let header = format!("Bearer {}", token);

        for method in [
            XrpcMethod::GetRecord,
            XrpcMethod::ListRecords,
            XrpcMethod::ListPermissionGrants,
            XrpcMethod::GetBlob,
        ] {
            let result = f.auth.authenticate(Some(&header), None, method).await;
            assert!(
                matches!(result, Err(PearError::Unauthenticated(_))),
                "{} accepted a foreign key",
                method.name()
            );
        }

        let as_alice = bearer(
            ServiceAssertion::new(did("did:plc:alice"), did("did:plc:bob"), "pear.getRecord"),
            &f.mallory,
        );
        assert!(f
            .auth
            .authenticate(Some(&as_alice), None, XrpcMethod::GetRecord)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn caller_header_needs_trust() {
        let untrusted = fixture(false);
        assert!(matches!(
            untrusted
                .auth
                .authenticate(None, Some("did:plc:bob"), XrpcMethod::GetRecord)
                .await,
            Err(PearError::Unauthenticated(_))
        ));

        let trusted = fixture(true);
        let caller = trusted
            .auth
            .authenticate(None, Some("did:plc:bob"), XrpcMethod::GetRecord)
            .await
            .unwrap();
        assert_eq!(caller, did("did:plc:bob"));
        assert!(trusted
            .auth
            .authenticate(None, None, XrpcMethod::GetRecord)
            .await
            .is_err());
    }
}
