use crate::error::PearError;
use thiserror::Error;

/// Result type for cross-node channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Error types for cross-node channel operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Identity lookup failed: {0}")]
    LookupFailed(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The remote node answered with a non-2xx status
    #[error("Remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Timeout error")]
    TimeoutError,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChannelError::TimeoutError
        } else if err.is_decode() {
            ChannelError::ProtocolError(err.to_string())
        } else {
            ChannelError::ConnectionError(err.to_string())
        }
    }
}

impl From<ChannelError> for PearError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Status { status, body } => {
                let parsed: Option<serde_json::Value> = serde_json::from_str(&body).ok();
                let kind = parsed
                    .as_ref()
                    .and_then(|v| v.get("error"))
                    .and_then(|v| v.as_str());
                let message = parsed
                    .as_ref()
                    .and_then(|v| v.get("message"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| body.clone());
                PearError::from_remote(status, kind, message)
            }
            ChannelError::TimeoutError => PearError::RemoteTimeout("remote call timed out".to_string()),
            other => PearError::RemoteFailure {
                status: 502,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_remote_statuses_onto_local_taxonomy() {
        let denied = ChannelError::Status {
            status: 403,
            body: r#"{"error":"Unauthorized","message":"Unauthorized"}"#.to_string(),
        };
        assert_eq!(PearError::from(denied), PearError::Unauthorized);

        let missing = ChannelError::Status {
            status: 404,
            body: "not json".to_string(),
        };
        assert_eq!(PearError::from(missing), PearError::RecordNotFound);

        let broken = ChannelError::Status {
            status: 500,
            body: r#"{"error":"DatabaseError","message":"disk full"}"#.to_string(),
        };
        assert_eq!(
            PearError::from(broken),
            PearError::RemoteFailure {
                status: 500,
                message: "disk full".to_string()
            }
        );
    }

    #[test]
    fn timeouts_stay_retryable() {
        let err = PearError::from(ChannelError::TimeoutError);
        assert!(err.is_retryable());
        assert!(matches!(err, PearError::RemoteTimeout(_)));
        assert!(PearError::from(ChannelError::ConnectionError("refused".into())).is_retryable());
    }
}
