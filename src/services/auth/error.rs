use std::time::Duration;
use thiserror::Error;
use tracing::error;

use crate::repos::error::RepoError;
use crate::services::cache::CacheError;

/// Why an impersonation request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenialReason {
    SelfImpersonation,
    TenantToSystem,
    CrossTenant,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfImpersonation => "cannot impersonate yourself",
            Self::TenantToSystem => "tenant principals cannot impersonate system principals",
            Self::CrossTenant => "target belongs to another tenant",
        }
    }
}

/// Outcome taxonomy of the authentication core.
///
/// Display strings reach clients.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked")]
    AccountLocked,

    #[error("account inactive")]
    AccountInactive,

    #[error("mfa session invalid or expired")]
    MfaSessionInvalid,

    #[error("invalid mfa code")]
    MfaCodeInvalid,

    #[error("mfa is not enrolled")]
    MfaNotEnrolled,

    #[error("rate limit exceeded")]
    RateLimited {
        limit: u64,
        current: u64,
        retry_after: Duration,
    },

    #[error("token generation failed")]
    TokenGenerationFailed,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("principal not found")]
    PrincipalNotFound,

    #[error("impersonation denied: {}", .0.as_str())]
    ImpersonationDenied(DenialReason),

    #[error("impersonation session already ended")]
    ImpersonationSessionAlreadyEnded,

    #[error("impersonation session not found")]
    ImpersonationSessionNotFound,

    #[error("store failure")]
    Store,
}

impl AuthError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountLocked => "account_locked",
            Self::AccountInactive => "account_inactive",
            Self::MfaSessionInvalid => "mfa_session_invalid",
            Self::MfaCodeInvalid => "mfa_code_invalid",
            Self::MfaNotEnrolled => "mfa_not_enrolled",
            Self::RateLimited { .. } => "rate_limited",
            Self::TokenGenerationFailed => "token_generation_failed",
            Self::InvalidToken => "invalid_token",
            Self::PrincipalNotFound => "principal_not_found",
            Self::ImpersonationDenied(_) => "impersonation_denied",
            Self::ImpersonationSessionAlreadyEnded => "impersonation_session_already_ended",
            Self::ImpersonationSessionNotFound => "impersonation_session_not_found",
            Self::Store => "internal",
        }
    }
}

impl From<RepoError> for AuthError {
    fn from(e: RepoError) -> Self {
        error!(error = %e, "repository failure");
        AuthError::Store
    }
}

impl From<CacheError> for AuthError {
    fn from(e: CacheError) -> Self {
        error!(error = %e, "cache failure");
        AuthError::Store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_are_opaque_to_clients() {
        let from_repo = AuthError::from(RepoError::Decode("bad principal_type".into()));
        assert!(matches!(from_repo, AuthError::Store));
        assert_eq!(from_repo.code(), "internal");
        assert!(!from_repo.to_string().contains("principal_type"));

        let from_cache = AuthError::from(CacheError::InvalidValue("k".into()));
        assert!(matches!(from_cache, AuthError::Store));
    }
}
