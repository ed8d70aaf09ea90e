//! Error types for hubkeeper
//!
//! Local failures (bad hub context, unknown role, missing credential) are
//! returned as `PortalError`; expected upstream failures travel inside
//! `ChainResponse` instead.

use hyper::StatusCode;

/// Main error type for portal operations
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("Hub not found: {0}")]
    TenantNotFound(String),

    #[error("No posting credential available for {0}")]
    MissingCredential(String),

    #[error("Invalid role: {0}. Must be one of: member, mod, admin")]
    InvalidRole(String),

    #[error("Post not found: {0}")]
    PostNotFound(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PortalError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidRole(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::TenantNotFound(_) | Self::PostNotFound(_) | Self::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::UpstreamUnavailable(_)
            | Self::MissingCredential(_)
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short, client-safe label for the error body
    pub fn label(&self) -> &'static str {
        match self {
            Self::TenantNotFound(_) => "Hub not found",
            Self::MissingCredential(_) => "Signing credential unavailable",
            Self::InvalidRole(_) => "Invalid role",
            Self::PostNotFound(_) => "Post not found",
            Self::UpstreamUnavailable(_) => "Upstream service unavailable",
            Self::Validation(_) => "Validation failed",
            Self::NotFound(_) => "Not found",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Forbidden(_) => "Forbidden",
            Self::Config(_) => "Configuration error",
            Self::Internal(_) => "Internal server error",
        }
    }

    /// Whether the message is safe to show outside dev mode
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl From<std::io::Error> for PortalError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias for portal operations
pub type Result<T> = std::result::Result<T, PortalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            PortalError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PortalError::InvalidRole("owner".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PortalError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PortalError::Forbidden("mallory".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            PortalError::TenantNotFound("hive-1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PortalError::PostNotFound("a/b".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PortalError::MissingCredential("admin".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            PortalError::UpstreamUnavailable("down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_client_error_flag() {
        assert!(PortalError::Validation("bad".into()).is_client_error());
        assert!(!PortalError::Internal("boom".into()).is_client_error());
    }
}
