//! Cross-node channel: identity directory, service assertions and the
//! transports that carry XRPC requests between nodes.

pub mod channel;
pub mod directory;
pub mod error;
pub mod loopback;
pub mod service_auth;

pub use channel::{HttpChannel, XrpcChannel, XrpcRequest, XrpcResponse, XrpcVerb};
pub use directory::{DidDocument, IdentityDirectory, StaticDirectory, PEAR_SERVICE};
pub use error::{ChannelError, ChannelResult};
pub use loopback::LoopbackNetwork;
pub use service_auth::{NodeSigner, ServiceAssertion, UnverifiedToken};
