//! Signed service assertions: how one node tells another which identity a
//! request is made as.
//!
//! Token format: `base64url(json(assertion)) "." base64url(ed25519 signature)`,
//! where the signature covers the first segment's bytes. The signing key is the
//! node key published for `iss` in the identity directory, so a node can only
//! speak for the identities it hosts.

use super::error::{ChannelError, ChannelResult};
use crate::grantee::Did;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Ed25519 secret key length in bytes
pub const SECRET_KEY_LENGTH: usize = 32;

/// Default lifetime of an assertion, in seconds.
pub const DEFAULT_ASSERTION_TTL_SECS: i64 = 60;

/// Claims carried by a service assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAssertion {
    /// Identity the request is made as
    pub iss: Did,
    /// Identity whose node the request is addressed to
    pub aud: Did,
    /// XRPC method the assertion is valid for
    pub lxm: String,
    /// Expiry, unix seconds
    pub exp: i64,
    pub nonce: String,
}

impl ServiceAssertion {
    pub fn new(iss: Did, aud: Did, lxm: &str) -> Self {
        Self {
            iss,
            aud,
            lxm: lxm.to_string(),
            exp: Utc::now().timestamp() + DEFAULT_ASSERTION_TTL_SECS,
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn sign(&self, signer: &NodeSigner) -> ChannelResult<String> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| ChannelError::AuthError(format!("cannot encode assertion: {}", e)))?;
        Ok(seal(&payload, signer))
    }

    /// Decodes a token without checking its signature. Callers must follow up
    /// with [`UnverifiedToken::verify`] before trusting any claim.
    pub fn decode(token: &str) -> ChannelResult<UnverifiedToken> {
        let (payload, signature) = token
            .split_once('.')
            .ok_or_else(|| ChannelError::AuthError("malformed assertion".to_string()))?;
        let claims_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| ChannelError::AuthError("malformed assertion payload".to_string()))?;
        let claims: ServiceAssertion = serde_json::from_slice(&claims_bytes)
            .map_err(|e| ChannelError::AuthError(format!("malformed assertion claims: {}", e)))?;
        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| ChannelError::AuthError("malformed assertion signature".to_string()))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| ChannelError::AuthError("malformed assertion signature".to_string()))?;
        Ok(UnverifiedToken {
            claims,
            payload: payload.to_string(),
            signature,
        })
    }
}

/// Encodes `payload` and appends the signature over the encoded form.
pub(crate) fn seal(payload: &[u8], signer: &NodeSigner) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(payload);
    let signature = signer.key.sign(encoded.as_bytes());
    format!(
        "{}.{}",
        encoded,
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    )
}

/// A decoded, not yet trusted, assertion token.
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    pub claims: ServiceAssertion,
    payload: String,
    signature: Signature,
}

impl UnverifiedToken {
    /// Checks the signature against `key`, the expiry and the method.
    pub fn verify(self, key: &VerifyingKey, method: &str) -> ChannelResult<ServiceAssertion> {
        key.verify(self.payload.as_bytes(), &self.signature)
            .map_err(|_| ChannelError::AuthError("assertion signature mismatch".to_string()))?;
        if self.claims.exp < Utc::now().timestamp() {
            return Err(ChannelError::AuthError("assertion expired".to_string()));
        }
        if self.claims.lxm != method {
            return Err(ChannelError::AuthError(format!(
                "assertion is for {}, not {}",
                self.claims.lxm, method
            )));
        }
        Ok(self.claims)
    }
}

/// The node's Ed25519 signing key.
pub struct NodeSigner {
    key: SigningKey,
}

impl NodeSigner {
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn to_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.key.to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Public key as published in directory documents.
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.key.verifying_key().to_bytes())
    }
}
