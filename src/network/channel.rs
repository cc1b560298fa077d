//! The cross-node request channel.

use super::directory::IdentityDirectory;
use super::error::{ChannelError, ChannelResult};
use super::service_auth::{NodeSigner, ServiceAssertion};
use crate::grantee::Did;
use crate::log_network_debug;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Whether an XRPC method reads (query, sent as GET) or writes (procedure, POST).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrpcVerb {
    Query,
    Procedure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XrpcRequest {
    pub method: String,
    pub verb: XrpcVerb,
    /// Query parameters or JSON body, always a JSON object
    pub params: Value,
}

impl XrpcRequest {
    pub fn query(method: &str, params: Value) -> Self {
        Self {
            method: method.to_string(),
            verb: XrpcVerb::Query,
            params,
        }
    }

    pub fn procedure(method: &str, body: Value) -> Self {
        Self {
            method: method.to_string(),
            verb: XrpcVerb::Procedure,
            params: body,
        }
    }

    /// Flattens `params` into query-string pairs. Arrays are comma-joined.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let Some(object) = self.params.as_object() else {
            return Vec::new();
        };
        object
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Array(items) => items
                        .iter()
                        .map(|item| match item {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(","),
                    other => other.to_string(),
                };
                (name.clone(), rendered)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct XrpcResponse {
    pub status: u16,
    pub body: Value,
}

/// Sends a request to the node hosting `receiver`, authenticated as `sender`.
/// Non-2xx answers come back as [`ChannelError::Status`].
#[async_trait]
pub trait XrpcChannel: Send + Sync {
    async fn send_xrpc(
        &self,
        sender: &Did,
        receiver: &Did,
        request: XrpcRequest,
    ) -> ChannelResult<XrpcResponse>;
}

/// Channel over HTTP, signing each request with the node key.
pub struct HttpChannel {
    client: reqwest::Client,
    directory: Arc<dyn IdentityDirectory>,
    signer: Arc<NodeSigner>,
}

impl HttpChannel {
    pub fn new(
        directory: Arc<dyn IdentityDirectory>,
        signer: Arc<NodeSigner>,
        timeout: Duration,
    ) -> ChannelResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::ConnectionError(format!("cannot build client: {}", e)))?;
        Ok(Self {
            client,
            directory,
            signer,
        })
    }

    async fn signs_for(&self, did: &Did) -> bool {
        match self.directory.lookup_did(did).await {
            Ok(document) => document.signing_key == Some(self.signer.public_key_base64()),
            Err(_) => false,
        }
    }

    /// Signs an assertion of `sender`, which must be published with this
    /// node's key.
    async fn assertion_for(&self, sender: &Did, receiver: &Did, method: &str) -> ChannelResult<String> {
        if !self.signs_for(sender).await {
            return Err(ChannelError::AuthError(format!(
                "cannot sign for {}, hosted elsewhere",
                sender
            )));
        }
        ServiceAssertion::new(sender.clone(), receiver.clone(), method).sign(&self.signer)
    }
}

#[async_trait]
impl XrpcChannel for HttpChannel {
    async fn send_xrpc(
        &self,
        sender: &Did,
        receiver: &Did,
        request: XrpcRequest,
    ) -> ChannelResult<XrpcResponse> {
        let document = self.directory.lookup_did(receiver).await?;
        let endpoint = document.pear_endpoint()?;
        let url = format!("{}/xrpc/{}", endpoint.trim_end_matches('/'), request.method);
        let token = self.assertion_for(sender, receiver, &request.method).await?;
        log_network_debug!("{} -> {} {} as {}", request.method, receiver, url, sender);

        let builder = match request.verb {
            XrpcVerb::Query => self.client.get(&url).query(&request.query_pairs()),
            XrpcVerb::Procedure => self.client.post(&url).json(&request.params),
        };
        let response = builder.bearer_auth(token).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(ChannelError::Status { status, body: text });
        }
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| ChannelError::ProtocolError(format!("invalid JSON from {}: {}", url, e)))?
        };
        Ok(XrpcResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::directory::{DidDocument, StaticDirectory};
    use serde_json::json;

    #[test]
    fn query_pairs_flatten_params() {
        let request = XrpcRequest::query(
            "pear.listRecords",
            json!({"collection": "app.posts", "owners": ["did:plc:a", "did:plc:b"], "limit": 5, "skip": null}),
        );
        let mut pairs = request.query_pairs();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("collection".to_string(), "app.posts".to_string()),
                ("limit".to_string(), "5".to_string()),
                ("owners".to_string(), "did:plc:a,did:plc:b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_receiver_fails_lookup() {
        let channel = HttpChannel::new(
            Arc::new(StaticDirectory::new()),
            Arc::new(NodeSigner::generate()),
            Duration::from_secs(1),
        )
        .unwrap();
        let alice = Did::parse("did:plc:alice").unwrap();
        let bob = Did::parse("did:plc:bob").unwrap();
        let result = channel
            .send_xrpc(&alice, &bob, XrpcRequest::query("pear.getRecord", json!({})))
            .await;
        assert!(matches!(result, Err(ChannelError::LookupFailed(_))));
    }

    #[tokio::test]
    async fn signs_only_for_identities_published_with_its_key() {
        let signer = Arc::new(NodeSigner::generate());
        let bob = Did::parse("did:plc:bob").unwrap();
        let alice = Did::parse("did:plc:alice").unwrap();
        let directory = StaticDirectory::from_documents([
            DidDocument::new(bob.clone(), "http://127.0.0.1:9"),
            DidDocument::new(alice.clone(), "http://127.0.0.1:9")
                .with_signing_key(&signer.public_key_base64()),
        ]);
        let channel =
            HttpChannel::new(Arc::new(directory), signer, Duration::from_secs(1)).unwrap();

        assert!(channel
            .assertion_for(&alice, &bob, "pear.getRecord")
            .await
            .is_ok());
        assert!(matches!(
            channel.assertion_for(&bob, &alice, "pear.getRecord").await,
            Err(ChannelError::AuthError(_))
        ));
    }
}
