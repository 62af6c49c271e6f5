use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::auth::IssuedTokens;

/// Request body for `POST /auth/login`.
#[derive(Clone, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
    /// Absent for SYSTEM principals.
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub remember_me: bool,
}

impl std::fmt::Debug for LoginBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginBody")
            .field("username", &self.username)
            .field("tenant_id", &self.tenant_id)
            .field("remember_me", &self.remember_me)
            .finish_non_exhaustive()
    }
}

/// Request body for `/auth/refresh` and `/auth/revoke`.
#[derive(Clone, Deserialize)]
pub struct RefreshTokenBody {
    pub refresh_token: String,
}

impl std::fmt::Debug for RefreshTokenBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RefreshTokenBody { .. }")
    }
}

/// The token bundle returned by every endpoint that authenticates.
#[derive(Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    /// Always "Bearer"
    pub token_type: &'static str,
    /// Seconds until the access token expires.
    pub expires_in: u64,
    pub refresh_expires_in: u64,
    pub remember_me: bool,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .field("remember_me", &self.remember_me)
            .finish_non_exhaustive()
    }
}

impl From<IssuedTokens> for TokenResponse {
    fn from(t: IssuedTokens) -> Self {
        Self {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            id_token: t.id_token,
            token_type: t.token_type,
            expires_in: t.expires_in,
            refresh_expires_in: t.refresh_expires_in,
            remember_me: t.remember_me,
        }
    }
}

/// Response of `POST /auth/login`: either an MFA hand-off or the token bundle.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub mfa_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_expires_at: Option<DateTime<Utc>>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenResponse>,
}

impl LoginResponse {
    pub fn mfa_required(session_id: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            mfa_required: true,
            mfa_session_id: Some(session_id),
            mfa_expires_at: Some(expires_at),
            tokens: None,
        }
    }

    pub fn authenticated(tokens: IssuedTokens) -> Self {
        Self {
            mfa_required: false,
            mfa_session_id: None,
            mfa_expires_at: None,
            tokens: Some(tokens.into()),
        }
    }
}

/// `GET /auth/me`: the caller's identity as the access token states it.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub principal_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub scope: String,
    pub amr: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonated_by: Option<Uuid>,
}
