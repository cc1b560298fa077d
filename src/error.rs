use thiserror::Error;

/// Unified error type for the node.
///
/// The first group of variants is the authorization-visible taxonomy every
/// orchestrator operation reports. `Unauthorized` never tells a caller whether
/// the record it asked about exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PearError {
    /// Permission denied, or the target is invisible to the caller
    #[error("Unauthorized")]
    Unauthorized,

    /// No caller identity could be established for the request
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// The caller may read the address but nothing is stored there
    #[error("Record not found")]
    RecordNotFound,

    /// The owner identity is not hosted on this node; the caller must re-route
    #[error("Identity {0} is not hosted on this node")]
    NotLocalRepo(String),

    /// Record value rejected by the collection schema
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Malformed request input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Another node answered with something other than a permission rejection
    #[error("Remote failure ({status}): {message}")]
    RemoteFailure { status: u16, message: String },

    /// A cross-node call hit its deadline or was cancelled; retryable
    #[error("Remote call timed out: {0}")]
    RemoteTimeout(String),

    /// Errors from the backing store
    #[error("Database error: {0}")]
    Database(String),

    /// Errors related to serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Errors related to configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PearError {
    /// HTTP status used when this error crosses the RPC boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            PearError::Unauthorized => 403,
            PearError::Unauthenticated(_) => 401,
            PearError::RecordNotFound => 404,
            PearError::NotLocalRepo(_) => 501,
            PearError::ValidationFailed(_) | PearError::InvalidInput(_) => 400,
            PearError::RemoteFailure { .. } => 502,
            PearError::RemoteTimeout(_) => 504,
            PearError::Database(_) | PearError::Serialization(_) | PearError::Config(_) => 500,
        }
    }

    /// Short machine-readable name, sent as the `error` field of RPC error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PearError::Unauthorized => "Unauthorized",
            PearError::Unauthenticated(_) => "Unauthenticated",
            PearError::RecordNotFound => "RecordNotFound",
            PearError::NotLocalRepo(_) => "NotLocalRepo",
            PearError::ValidationFailed(_) => "ValidationFailed",
            PearError::InvalidInput(_) => "InvalidInput",
            PearError::RemoteFailure { .. } => "RemoteFailure",
            PearError::RemoteTimeout(_) => "RemoteTimeout",
            PearError::Database(_) => "DatabaseError",
            PearError::Serialization(_) => "SerializationError",
            PearError::Config(_) => "ConfigurationError",
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PearError::RemoteTimeout(_) | PearError::RemoteFailure { .. }
        )
    }

    /// Rebuild an error from a status code and `error` kind received from another node.
    pub fn from_remote(status: u16, kind: Option<&str>, message: String) -> Self {
        match (status, kind) {
            (401, _) | (403, _) => PearError::Unauthorized,
            (404, _) => PearError::RecordNotFound,
            (501, _) => PearError::NotLocalRepo(message),
            (400, Some("ValidationFailed")) => PearError::ValidationFailed(message),
            (400, _) => PearError::InvalidInput(message),
            (504, _) => PearError::RemoteTimeout(message),
            _ => PearError::RemoteFailure { status, message },
        }
    }
}

impl From<sled::Error> for PearError {
    fn from(error: sled::Error) -> Self {
        PearError::Database(error.to_string())
    }
}

impl From<sled::transaction::TransactionError<PearError>> for PearError {
    fn from(error: sled::transaction::TransactionError<PearError>) -> Self {
        match error {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => PearError::Database(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for PearError {
    fn from(error: serde_json::Error) -> Self {
        PearError::Serialization(error.to_string())
    }
}

// Type aliases for convenience
pub type PearResult<T> = Result<T, PearError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_rpc_mapping() {
        assert_eq!(PearError::Unauthorized.status_code(), 403);
        assert_eq!(PearError::RecordNotFound.status_code(), 404);
        assert_eq!(PearError::NotLocalRepo("did:x".into()).status_code(), 501);
        assert_eq!(PearError::InvalidInput("bad".into()).status_code(), 400);
        assert_eq!(PearError::Database("boom".into()).status_code(), 500);
    }

    #[test]
    fn remote_permission_rejection_maps_to_unauthorized() {
        assert_eq!(
            PearError::from_remote(403, Some("Unauthorized"), String::new()),
            PearError::Unauthorized
        );
        assert!(matches!(
            PearError::from_remote(500, Some("DatabaseError"), "x".into()),
            PearError::RemoteFailure { status: 500, .. }
        ));
        assert!(PearError::RemoteTimeout("slow".into()).is_retryable());
        assert!(!PearError::Unauthorized.is_retryable());
    }
}
