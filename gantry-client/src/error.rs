//! Error types for the Gantry client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the remote runner service
#[derive(Debug, Error)]
pub enum ClientError {
    /// Payload failed local validation; one message per offending field
    #[error("invalid payload: {}", .0.join(", "))]
    Validation(Vec<String>),

    /// Category is not on the allow-list of remote workflows
    #[error("unknown job category: {0}")]
    InvalidCategory(String),

    /// The remote service does not know the requested job
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote service answered with a non-2xx status
    #[error("remote service error (status {status}): {body}")]
    Remote {
        /// HTTP status code
        status: u16,
        /// Response body as returned by the service
        body: String,
    },

    /// Transport-level failure (connection refused, timeout, ...)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response arrived but could not be decoded
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl ClientError {
    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::Remote { status: 404, .. })
    }

    /// Check if this error would have been retried by the client
    ///
    /// Network failures and 5xx responses are transient; everything else is
    /// a definitive answer.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_field() {
        let err = ClientError::Validation(vec![
            "login is required".to_string(),
            "tax_id is required".to_string(),
        ]);
        let message = err.to_string();
        assert!(message.contains("login is required"));
        assert!(message.contains("tax_id is required"));
    }

    #[test]
    fn test_retryability() {
        assert!(
            ClientError::Remote {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ClientError::Remote {
                status: 404,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!ClientError::InvalidCategory("FOO".to_string()).is_retryable());
    }
}
