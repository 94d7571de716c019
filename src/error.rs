//! Unified error model for the authentication core.
//! Every operation exposed upward returns `AuthResult<T>`; storage adapters speak
//! `StoreError` and are mapped here so driver errors never reach callers.

use serde::Serialize;
use thiserror::Error;

use crate::storage::StoreError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredential,
    #[error("account is disabled")]
    AccountDisabled,
    #[error("account has not been activated yet")]
    AccountPending,
    #[error("account has expired")]
    AccountExpired,
    #[error("integration is disabled")]
    IntegrationDisabled,
    #[error("integration has not been activated yet")]
    IntegrationPending,
    #[error("integration has expired")]
    IntegrationExpired,
    #[error("invalid token")]
    InvalidToken,
    #[error("token has expired")]
    Expired,
    #[error("token claims are malformed")]
    MalformedClaims,
    #[error("token could not be parsed: {0}")]
    TokenParse(String),
    #[error("session not found")]
    SessionNotFound,
    #[error("access denied")]
    Denied,
    #[error("credential store unavailable: {0}")]
    StorageUnavailable(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("internal error: {0}")]
    Internal(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    pub fn code_str(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential => "invalid_credential",
            AuthError::AccountDisabled => "account_disabled",
            AuthError::AccountPending => "account_pending",
            AuthError::AccountExpired => "account_expired",
            AuthError::IntegrationDisabled => "integration_disabled",
            AuthError::IntegrationPending => "integration_pending",
            AuthError::IntegrationExpired => "integration_expired",
            AuthError::InvalidToken => "invalid_token",
            AuthError::Expired => "token_expired",
            AuthError::MalformedClaims => "malformed_claims",
            AuthError::TokenParse(_) => "token_parse",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::Denied => "denied",
            AuthError::StorageUnavailable(_) => "storage_unavailable",
            AuthError::InvalidArgument(_) => "invalid_argument",
            AuthError::NotFound(_) => "not_found",
            AuthError::DeadlineExceeded => "deadline_exceeded",
            AuthError::Internal(_) => "internal",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::InvalidArgument(_) => 400,
            AuthError::InvalidCredential
            | AuthError::InvalidToken
            | AuthError::Expired
            | AuthError::MalformedClaims
            | AuthError::TokenParse(_)
            | AuthError::SessionNotFound => 401,
            AuthError::AccountDisabled
            | AuthError::AccountPending
            | AuthError::AccountExpired
            | AuthError::IntegrationDisabled
            | AuthError::IntegrationPending
            | AuthError::IntegrationExpired
            | AuthError::Denied => 403,
            AuthError::NotFound(_) => 404,
            AuthError::StorageUnavailable(_) => 503,
            AuthError::DeadlineExceeded => 504,
            AuthError::Internal(_) => 500,
        }
    }

    /// Only transport-level storage failures may be retried, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::StorageUnavailable(_))
    }

    /// Message safe to hand to an unauthenticated caller. Credential and
    /// authorization failures collapse to a single string each; backend detail
    /// stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::InvalidCredential => "invalid credentials".into(),
            AuthError::Denied => "access denied".into(),
            AuthError::TokenParse(_) | AuthError::MalformedClaims => "invalid token".into(),
            AuthError::StorageUnavailable(_) => "service unavailable".into(),
            AuthError::Internal(_) => "internal error".into(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AuthError::NotFound(what),
            StoreError::Unavailable(msg) => AuthError::StorageUnavailable(msg),
            StoreError::Timeout => AuthError::DeadlineExceeded,
            StoreError::Conflict(msg) | StoreError::InvalidArgument(msg) => AuthError::InvalidArgument(msg),
        }
    }
}

/// JSON body rendered by the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl From<&AuthError> for ErrorBody {
    fn from(err: &AuthError) -> Self {
        ErrorBody { code: err.code_str(), message: err.public_message() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AuthError::InvalidArgument("x".into()).http_status(), 400);
        assert_eq!(AuthError::InvalidCredential.http_status(), 401);
        assert_eq!(AuthError::SessionNotFound.http_status(), 401);
        assert_eq!(AuthError::Expired.http_status(), 401);
        assert_eq!(AuthError::Denied.http_status(), 403);
        assert_eq!(AuthError::AccountExpired.http_status(), 403);
        assert_eq!(AuthError::NotFound("role".into()).http_status(), 404);
        assert_eq!(AuthError::StorageUnavailable("down".into()).http_status(), 503);
        assert_eq!(AuthError::DeadlineExceeded.http_status(), 504);
        assert_eq!(AuthError::Internal("boom".into()).http_status(), 500);
    }

    #[test]
    fn public_messages_do_not_leak_detail() {
        assert_eq!(AuthError::InvalidCredential.public_message(), "invalid credentials");
        assert_eq!(AuthError::Denied.public_message(), "access denied");
        let e = AuthError::StorageUnavailable("pool timed out on 10.0.0.4".into());
        assert!(!e.public_message().contains("10.0.0.4"));
        let e = AuthError::TokenParse("InvalidBase64".into());
        assert_eq!(e.public_message(), "invalid token");
    }

    #[test]
    fn only_storage_failures_are_retryable() {
        assert!(AuthError::StorageUnavailable("x".into()).is_retryable());
        assert!(!AuthError::Denied.is_retryable());
        assert!(!AuthError::DeadlineExceeded.is_retryable());
    }

    #[test]
    fn store_errors_map_to_auth_kinds() {
        assert_eq!(AuthError::from(StoreError::Timeout), AuthError::DeadlineExceeded);
        assert_eq!(
            AuthError::from(StoreError::Unavailable("io".into())),
            AuthError::StorageUnavailable("io".into())
        );
        assert_eq!(
            AuthError::from(StoreError::NotFound("session".into())),
            AuthError::NotFound("session".into())
        );
    }
}
