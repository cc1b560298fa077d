//! In-process network: routes channel requests straight into other [`Pear`]
//! instances through [`rpc::dispatch`], with optional per-node latency and
//! reachability for failure scenarios.
//!
//! Nodes added with [`LoopbackNetwork::register_signed`] take part in service
//! authentication: requests from them carry an assertion signed with their
//! node key, and requests to them are admitted by their
//! [`CallerAuthenticator`] exactly as the HTTP edge would.

use super::channel::{XrpcChannel, XrpcRequest, XrpcResponse};
use super::error::{ChannelError, ChannelResult};
use super::service_auth::{NodeSigner, ServiceAssertion};
use crate::error::PearError;
use crate::grantee::Did;
use crate::log_network_debug;
use crate::pear::Pear;
use crate::pear_node::CallerAuthenticator;
use crate::rpc::{self, XrpcMethod};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Key a node signs with and the authenticator that admits its callers.
struct NodeCredentials {
    signer: Arc<NodeSigner>,
    authenticator: CallerAuthenticator,
}

#[derive(Clone)]
struct Route {
    pear: Pear,
    latency: Option<Duration>,
    reachable: bool,
    credentials: Option<Arc<NodeCredentials>>,
}

/// Registry of in-process nodes. A request for an identity goes to the
/// registered node hosting it. Unsigned nodes take the sender as the caller.
#[derive(Default)]
pub struct LoopbackNetwork {
    routes: RwLock<Vec<Route>>,
    overrides: RwLock<HashMap<Did, (Option<Duration>, bool)>>,
}

fn status_error(error: &PearError) -> ChannelError {
    ChannelError::Status {
        status: error.status_code(),
        body: rpc::error_body(error).to_string(),
    }
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a node; identities it hosts, now or later, become reachable.
    pub fn register(&self, pear: &Pear) {
        self.add_route(pear, None);
    }

    /// Adds a node that signs its requests with `signer` and only admits
    /// callers `authenticator` verifies.
    pub fn register_signed(
        &self,
        pear: &Pear,
        signer: Arc<NodeSigner>,
        authenticator: CallerAuthenticator,
    ) {
        self.add_route(
            pear,
            Some(Arc::new(NodeCredentials {
                signer,
                authenticator,
            })),
        );
    }

    fn add_route(&self, pear: &Pear, credentials: Option<Arc<NodeCredentials>>) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.push(Route {
            pear: pear.clone(),
            latency: None,
            reachable: true,
            credentials,
        });
    }

    /// Delays every request addressed to `did`.
    pub fn set_latency(&self, did: &Did, latency: Duration) {
        let mut overrides = self.overrides.write().unwrap_or_else(|e| e.into_inner());
        overrides.entry(did.clone()).or_insert((None, true)).0 = Some(latency);
    }

    /// Makes requests addressed to `did` fail with a connection error.
    pub fn set_reachable(&self, did: &Did, reachable: bool) {
        let mut overrides = self.overrides.write().unwrap_or_else(|e| e.into_inner());
        overrides.entry(did.clone()).or_insert((None, true)).1 = reachable;
    }

    fn hosting_route(&self, did: &Did) -> ChannelResult<Route> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        for route in routes.iter() {
            let hosted = route
                .pear
                .is_local(did)
                .map_err(|e| ChannelError::LookupFailed(e.to_string()))?;
            if hosted {
                return Ok(route.clone());
            }
        }
        Err(ChannelError::LookupFailed(format!("unknown identity {}", did)))
    }

    /// Route to the node hosting `did`, after its latency, if reachable.
    async fn reach(&self, did: &Did) -> ChannelResult<Route> {
        let mut route = self.hosting_route(did)?;
        {
            let overrides = self.overrides.read().unwrap_or_else(|e| e.into_inner());
            if let Some((latency, reachable)) = overrides.get(did) {
                route.latency = *latency;
                route.reachable = *reachable;
            }
        }
        if !route.reachable {
            return Err(ChannelError::ConnectionError(format!(
                "node hosting {} is unreachable",
                did
            )));
        }
        if let Some(latency) = route.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(route)
    }

    async fn admit(
        credentials: &NodeCredentials,
        token: &str,
        method: &str,
    ) -> ChannelResult<Did> {
        let method = XrpcMethod::parse(method).map_err(|e| status_error(&e))?;
        let bearer = format!("Bearer {}", token);
        credentials
            .authenticator
            .authenticate(Some(&bearer), None, method)
            .await
            .map_err(|e| status_error(&e))
    }

    async fn dispatch(route: &Route, caller: &Did, request: XrpcRequest) -> ChannelResult<XrpcResponse> {
        match rpc::dispatch(&route.pear, caller, &request.method, request.params).await {
            Ok(body) => Ok(XrpcResponse { status: 200, body }),
            Err(e) => Err(status_error(&e)),
        }
    }

    /// Sends `request` to the node hosting `receiver` with a ready-made
    /// bearer token. The node must verify assertions.
    pub async fn send_with_token(
        &self,
        receiver: &Did,
        token: &str,
        request: XrpcRequest,
    ) -> ChannelResult<XrpcResponse> {
        let route = self.reach(receiver).await?;
        let credentials = route.credentials.clone().ok_or_else(|| {
            ChannelError::AuthError(format!("node hosting {} does not verify assertions", receiver))
        })?;
        let caller = Self::admit(&credentials, token, &request.method).await?;
        Self::dispatch(&route, &caller, request).await
    }
}

#[async_trait]
impl XrpcChannel for LoopbackNetwork {
    async fn send_xrpc(
        &self,
        sender: &Did,
        receiver: &Did,
        request: XrpcRequest,
    ) -> ChannelResult<XrpcResponse> {
        let route = self.reach(receiver).await?;
        let caller = match &route.credentials {
            None => sender.clone(),
            Some(credentials) => {
                let signer = self
                    .hosting_route(sender)?
                    .credentials
                    .map(|own| own.signer.clone())
                    .ok_or_else(|| {
                        ChannelError::AuthError(format!("no node key signs for {}", sender))
                    })?;
                let token = ServiceAssertion::new(sender.clone(), receiver.clone(), &request.method)
                    .sign(&signer)?;
                Self::admit(credentials, &token, &request.method).await?
            }
        };
        log_network_debug!("loopback {} -> {} as {}", request.method, receiver, caller);
        Self::dispatch(&route, &caller, request).await
    }
}
