//! Error types for predacl
//!
//! Every variant renders with its kind name first so callers and client
//! libraries can match on a stable substring (`PermissionDenied`, ...).

use thiserror::Error;

/// The main error type for predacl operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclError {
    #[error("InvalidCredentials: invalid username or password")]
    InvalidCredentials,
    #[error("TokenExpired: access token has expired")]
    TokenExpired,
    #[error("TokenInvalid: {0}")]
    TokenInvalid(String),
    #[error("RefreshExpired: refresh token has expired")]
    RefreshExpired,
    #[error("RefreshInvalid: {0}")]
    RefreshInvalid(String),
    #[error("PermissionDenied: {0}")]
    PermissionDenied(String),
    #[error("ReservedPredicateViolation: {0}")]
    ReservedPredicateViolation(String),
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("InvalidRequest: {0}")]
    InvalidRequest(String),
    #[error("Config: {0}")]
    Config(String),
    #[error("Storage: {0}")]
    Storage(String),
}

impl AclError {
    /// Stable kind name, identical to the prefix of the rendered message
    pub fn kind(&self) -> &'static str {
        match self {
            AclError::InvalidCredentials => "InvalidCredentials",
            AclError::TokenExpired => "TokenExpired",
            AclError::TokenInvalid(_) => "TokenInvalid",
            AclError::RefreshExpired => "RefreshExpired",
            AclError::RefreshInvalid(_) => "RefreshInvalid",
            AclError::PermissionDenied(_) => "PermissionDenied",
            AclError::ReservedPredicateViolation(_) => "ReservedPredicateViolation",
            AclError::Unauthenticated(_) => "Unauthenticated",
            AclError::InvalidRequest(_) => "InvalidRequest",
            AclError::Config(_) => "Config",
            AclError::Storage(_) => "Storage",
        }
    }

    /// True for failures that mean "who are you?" rather than "you may not"
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            AclError::InvalidCredentials
                | AclError::TokenExpired
                | AclError::TokenInvalid(_)
                | AclError::RefreshExpired
                | AclError::RefreshInvalid(_)
                | AclError::Unauthenticated(_)
        )
    }
}

impl From<heed::Error> for AclError {
    fn from(e: heed::Error) -> Self {
        AclError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for AclError {
    fn from(e: std::io::Error) -> Self {
        AclError::Storage(e.to_string())
    }
}

/// Result type alias for predacl operations
pub type Result<T> = std::result::Result<T, AclError>;
