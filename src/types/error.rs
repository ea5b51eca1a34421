//! Error types for natter-gate
//!
//! Credential failures never carry detail about which check failed; the
//! variants here describe what the caller should do, not why a token was bad.

use hyper::StatusCode;

/// Main error type for token store and gate operations
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Persistence layer failure. Transient, never treated as "invalid token".
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// The store variant does not provide this operation (e.g. revoking a
    /// stateless token).
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Key set error: {0}")]
    KeySet(String),
}

impl GateError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            Self::KeySet(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for GateError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<mongodb::error::Error> for GateError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for GateError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Internal(format!("JWT error: {}", err))
    }
}

/// Result type alias for natter-gate operations
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_failure_is_transient() {
        let err = GateError::Database("connection reset".into());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_unsupported_maps_to_not_implemented() {
        let (status, body) =
            GateError::Unsupported("revoke".into()).into_status_code_and_body();
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert!(body.contains("revoke"));
    }
}
