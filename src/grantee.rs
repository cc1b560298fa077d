//! Identities, record addresses and grantees.
//!
//! A grantee is stored and transmitted in its string form: either a bare
//! identity (`did:...`) or the canonical URI of a clique record
//! (`pear://<owner-did>/pear.clique/<key>`). Parsing tries identity syntax
//! first and clique syntax second; anything else is rejected.

use crate::error::{PearError, PearResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// URI scheme used for record addresses.
pub const URI_SCHEME: &str = "pear://";

/// Collection holding clique records. Membership of a clique is the set of
/// identities granted read on the clique record's own address.
pub const CLIQUE_COLLECTION: &str = "pear.clique";

/// A decentralized identifier, e.g. `did:plc:alice`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    pub fn parse(value: &str) -> PearResult<Self> {
        let rest = value
            .strip_prefix("did:")
            .ok_or_else(|| PearError::InvalidInput(format!("'{}' is not a DID", value)))?;
        let (method, id) = rest
            .split_once(':')
            .ok_or_else(|| PearError::InvalidInput(format!("DID '{}' has no method", value)))?;
        let valid_method = !method.is_empty() && method.chars().all(|c| c.is_ascii_lowercase());
        let valid_id = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '%'));
        if !valid_method || !valid_id {
            return Err(PearError::InvalidInput(format!("malformed DID '{}'", value)));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Did {
    type Err = PearError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Did::parse(s)
    }
}

impl TryFrom<String> for Did {
    type Error = PearError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Did::parse(&value)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.0
    }
}

/// Checks a collection name or wildcard pattern (`a.b`, `a.b.*`, `*`).
pub fn validate_collection(collection: &str) -> PearResult<()> {
    if collection.is_empty() {
        return Err(PearError::InvalidInput("collection must not be empty".to_string()));
    }
    if collection == "*" {
        return Ok(());
    }
    let body = collection.strip_suffix(".*").unwrap_or(collection);
    let valid = !body.is_empty()
        && body.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(PearError::InvalidInput(format!(
            "malformed collection '{}'",
            collection
        )))
    }
}

/// Whether a collection string is a wildcard pattern rather than a concrete name.
pub fn is_wildcard_collection(collection: &str) -> bool {
    collection == "*" || collection.ends_with(".*")
}

/// Checks a record key. Keys are single path segments.
pub fn validate_record_key(record_key: &str) -> PearResult<()> {
    let valid = !record_key.is_empty()
        && record_key.len() <= 512
        && record_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '~'));
    if valid {
        Ok(())
    } else {
        Err(PearError::InvalidInput(format!(
            "malformed record key '{}'",
            record_key
        )))
    }
}

/// Address of a record: owner identity, collection and record key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordUri {
    pub owner: Did,
    pub collection: String,
    pub record_key: String,
}

impl RecordUri {
    pub fn new(owner: Did, collection: &str, record_key: &str) -> PearResult<Self> {
        validate_collection(collection)?;
        if is_wildcard_collection(collection) {
            return Err(PearError::InvalidInput(format!(
                "record address cannot use wildcard collection '{}'",
                collection
            )));
        }
        validate_record_key(record_key)?;
        Ok(Self {
            owner,
            collection: collection.to_string(),
            record_key: record_key.to_string(),
        })
    }

    /// Address of the clique `record_key` owned by `owner`.
    pub fn clique(owner: Did, record_key: &str) -> PearResult<Self> {
        Self::new(owner, CLIQUE_COLLECTION, record_key)
    }

    pub fn parse(value: &str) -> PearResult<Self> {
        let rest = value
            .strip_prefix(URI_SCHEME)
            .ok_or_else(|| PearError::InvalidInput(format!("'{}' is not a record URI", value)))?;
        let mut parts = rest.splitn(3, '/');
        let (Some(owner), Some(collection), Some(record_key)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(PearError::InvalidInput(format!(
                "record URI '{}' needs owner, collection and key",
                value
            )));
        };
        Self::new(Did::parse(owner)?, collection, record_key)
    }

    pub fn is_clique(&self) -> bool {
        self.collection == CLIQUE_COLLECTION
    }
}

impl fmt::Display for RecordUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}/{}/{}",
            URI_SCHEME, self.owner, self.collection, self.record_key
        )
    }
}

impl FromStr for RecordUri {
    type Err = PearError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordUri::parse(s)
    }
}

impl TryFrom<String> for RecordUri {
    type Error = PearError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RecordUri::parse(&value)
    }
}

impl From<RecordUri> for String {
    fn from(uri: RecordUri) -> Self {
        uri.to_string()
    }
}

/// The principal side of a permission row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Grantee {
    /// A single identity.
    Identity(Did),
    /// Whoever is currently a member of the clique at this address.
    Clique(RecordUri),
}

impl Grantee {
    pub fn parse(value: &str) -> PearResult<Self> {
        if let Ok(did) = Did::parse(value) {
            return Ok(Grantee::Identity(did));
        }
        match RecordUri::parse(value) {
            Ok(uri) if uri.is_clique() => Ok(Grantee::Clique(uri)),
            Ok(uri) => Err(PearError::InvalidInput(format!(
                "grantee '{}' addresses collection '{}', not a clique",
                value, uri.collection
            ))),
            Err(_) => Err(PearError::InvalidInput(format!(
                "grantee '{}' is neither a DID nor a clique URI",
                value
            ))),
        }
    }

    /// Parses every entry before returning, so a single malformed grantee
    /// rejects the whole list.
    pub fn parse_all<S: AsRef<str>>(values: &[S]) -> PearResult<Vec<Self>> {
        values.iter().map(|v| Grantee::parse(v.as_ref())).collect()
    }

    /// Identity whose node stores this grantee: the identity itself, or the clique owner.
    pub fn home(&self) -> &Did {
        match self {
            Grantee::Identity(did) => did,
            Grantee::Clique(uri) => &uri.owner,
        }
    }

    pub fn as_clique(&self) -> Option<&RecordUri> {
        match self {
            Grantee::Clique(uri) => Some(uri),
            Grantee::Identity(_) => None,
        }
    }
}

impl fmt::Display for Grantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grantee::Identity(did) => did.fmt(f),
            Grantee::Clique(uri) => uri.fmt(f),
        }
    }
}

impl FromStr for Grantee {
    type Err = PearError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Grantee::parse(s)
    }
}

impl TryFrom<String> for Grantee {
    type Error = PearError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Grantee::parse(&value)
    }
}

impl From<Grantee> for String {
    fn from(grantee: Grantee) -> Self {
        grantee.to_string()
    }
}

impl From<Did> for Grantee {
    fn from(did: Did) -> Self {
        Grantee::Identity(did)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identity_before_clique() {
        let grantee = Grantee::parse("did:plc:bob").unwrap();
        assert_eq!(grantee, Grantee::Identity(Did::parse("did:plc:bob").unwrap()));

        let clique = Grantee::parse("pear://did:plc:alice/pear.clique/friends").unwrap();
        match &clique {
            Grantee::Clique(uri) => {
                assert_eq!(uri.owner.as_str(), "did:plc:alice");
                assert_eq!(uri.record_key, "friends");
            }
            Grantee::Identity(_) => panic!("expected clique"),
        }
        assert_eq!(clique.to_string(), "pear://did:plc:alice/pear.clique/friends");
        assert_eq!(clique.home().as_str(), "did:plc:alice");
    }

    #[test]
    fn rejects_non_clique_uris_and_garbage() {
        assert!(Grantee::parse("pear://did:plc:alice/app.posts/p1").is_err());
        assert!(Grantee::parse("bob").is_err());
        assert!(Grantee::parse("did:plc:").is_err());
        assert!(Grantee::parse_all(&["did:plc:ok", "nope"]).is_err());
    }

    #[test]
    fn collection_patterns() {
        assert!(validate_collection("app.posts").is_ok());
        assert!(validate_collection("app.*").is_ok());
        assert!(validate_collection("*").is_ok());
        assert!(validate_collection("").is_err());
        assert!(validate_collection("app..posts").is_err());
        assert!(validate_collection("app/posts").is_err());
        assert!(is_wildcard_collection("app.*"));
        assert!(!is_wildcard_collection("app.posts"));
    }

    #[test]
    fn record_uri_round_trips_through_serde() {
        let uri = RecordUri::parse("pear://did:web:example.com/app.posts/p1").unwrap();
        let json = serde_json::to_string(&uri).unwrap();
        assert_eq!(json, "\"pear://did:web:example.com/app.posts/p1\"");
        let back: RecordUri = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uri);
        assert!(RecordUri::parse("pear://did:plc:a/app.*/p1").is_err());
    }
}
