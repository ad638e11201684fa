// Error handling module
// Defines the error taxonomy shared by the token manager, executor and poller

use thiserror::Error;

/// Errors raised by the credential, request and polling layers
#[derive(Error, Debug)]
pub enum ProbeError {
    /// No stored credential, recoverable by an interactive login
    #[error("No stored credential found at {0}")]
    CredentialNotFound(String),

    /// Token is not a decodable header.payload.signature triple
    #[error("Malformed token: {0}")]
    TokenMalformed(String),

    /// Refresh exchange was rejected or could not be completed
    #[error("Token refresh failed: {message}")]
    RefreshFailed {
        status: Option<u16>,
        message: String,
    },

    /// Login exchange was rejected or could not be completed
    #[error("Login failed: {message}")]
    LoginFailed {
        status: Option<u16>,
        message: String,
    },

    /// Loading or refreshing the credential failed
    #[error("Authentication unavailable: {0}")]
    AuthenticationUnavailable(#[source] Box<ProbeError>),

    /// The call mandated authentication but no token could be obtained
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// Network level failure (connect, timeout, TLS, body read)
    #[error("Transport error ({kind}): {message}")]
    TransportError { kind: &'static str, message: String },

    /// Polling deadline elapsed
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Response body did not have the shape an adapter expects
    #[error("Response shape not recognized for {endpoint}: {detail}")]
    ShapeNotRecognized { endpoint: String, detail: String },

    /// Invalid configuration supplied by the caller
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Credential store I/O failure
    #[error("Credential storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl ProbeError {
    /// Build a transport error, categorizing the reqwest failure
    pub fn transport(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connection_failed"
        } else if err.is_request() {
            "request_error"
        } else if err.is_body() {
            "body_error"
        } else if err.is_decode() {
            "decode_error"
        } else {
            "unknown"
        };

        ProbeError::TransportError {
            kind,
            message: err.to_string(),
        }
    }

    /// Only transport failures may be retried, and only by the poller
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::TransportError { .. })
    }

    /// True when an interactive login would resolve the failure
    pub fn needs_login(&self) -> bool {
        match self {
            ProbeError::CredentialNotFound(_) | ProbeError::RefreshFailed { .. } => true,
            ProbeError::AuthenticationUnavailable(inner) => inner.needs_login(),
            _ => false,
        }
    }
}

/// Result type alias for probe operations
pub type Result<T> = std::result::Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ProbeError::CredentialNotFound("/tmp/creds".to_string());
        assert_eq!(err.to_string(), "No stored credential found at /tmp/creds");

        let err = ProbeError::RefreshFailed {
            status: Some(401),
            message: "401 Unauthorized - expired".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Token refresh failed: 401 Unauthorized - expired"
        );

        let err = ProbeError::TransportError {
            kind: "timeout",
            message: "operation timed out".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Transport error (timeout): operation timed out"
        );
    }

    #[test]
    fn test_authentication_unavailable_wraps_source() {
        use std::error::Error as _;

        let err = ProbeError::AuthenticationUnavailable(Box::new(
            ProbeError::CredentialNotFound("store".to_string()),
        ));
        assert_eq!(
            err.to_string(),
            "Authentication unavailable: No stored credential found at store"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_only_transport_errors_are_retryable() {
        let transport = ProbeError::TransportError {
            kind: "connection_failed",
            message: "refused".to_string(),
        };
        assert!(transport.is_retryable());

        assert!(!ProbeError::AuthenticationRequired("no token".to_string()).is_retryable());
        assert!(!ProbeError::Aborted("deadline".to_string()).is_retryable());
        assert!(!ProbeError::InvalidConfig("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_needs_login() {
        assert!(ProbeError::CredentialNotFound("x".to_string()).needs_login());

        let wrapped = ProbeError::AuthenticationUnavailable(Box::new(ProbeError::RefreshFailed {
            status: Some(400),
            message: "invalid grant".to_string(),
        }));
        assert!(wrapped.needs_login());

        let wrapped = ProbeError::AuthenticationUnavailable(Box::new(ProbeError::TransportError {
            kind: "timeout",
            message: "slow".to_string(),
        }));
        assert!(!wrapped.needs_login());
    }
}
