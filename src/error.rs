/*
 * Responsibility
 * - アプリ共通の AppError 定義
 * - IntoResponse 実装 (HTTP status / JSON error body / rate-limit headers)
 * - AuthError / RateLimitError / RepoError / ConfigError を統一的に変換
 */
use axum::{
    Json,
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

use crate::config::ConfigError;
use crate::repos::error::RepoError;
use crate::services::auth::AuthError;
use crate::services::rate_limit::RateLimitError;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{code}: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("not found: {resource}")]
    NotFound { resource: &'static str },
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("rate limit exceeded")]
    RateLimited {
        limit: u64,
        retry_after: Duration,
        reset_at: Option<DateTime<Utc>>,
    },
    #[error(transparent)]
    Auth(AuthError),
    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(resource: &'static str) -> Self {
        Self::NotFound { resource }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Auth(e) => auth_status(e),
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn auth_status(e: &AuthError) -> StatusCode {
    match e {
        AuthError::InvalidCredentials
        | AuthError::MfaSessionInvalid
        | AuthError::MfaCodeInvalid
        | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
        AuthError::AccountLocked => StatusCode::LOCKED,
        AuthError::AccountInactive | AuthError::ImpersonationDenied(_) => StatusCode::FORBIDDEN,
        AuthError::MfaNotEnrolled => StatusCode::BAD_REQUEST,
        AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        AuthError::PrincipalNotFound | AuthError::ImpersonationSessionNotFound => {
            StatusCode::NOT_FOUND
        }
        AuthError::ImpersonationSessionAlreadyEnded => StatusCode::CONFLICT,
        AuthError::TokenGenerationFailed | AuthError::Store => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn header_value(v: impl ToString) -> Option<HeaderValue> {
    HeaderValue::from_str(&v.to_string()).ok()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let mut rate_limit: Option<(u64, Duration, Option<DateTime<Utc>>)> = None;
        let (code, message) = match self {
            AppError::BadRequest { code, message } => (code, message),
            AppError::NotFound { resource } => ("not_found", format!("{resource} not found.")),
            AppError::Unauthorized => ("unauthorized", "unauthorized".into()),
            AppError::Forbidden => ("forbidden", "forbidden".into()),
            AppError::RateLimited {
                limit,
                retry_after,
                reset_at,
            } => {
                rate_limit = Some((limit, retry_after, reset_at));
                ("rate_limited", "rate limit exceeded".into())
            }
            AppError::Auth(e) => {
                if let AuthError::RateLimited {
                    limit, retry_after, ..
                } = e
                {
                    rate_limit = Some((limit, retry_after, None));
                }
                if status.is_server_error() {
                    ("internal", "internal server error".into())
                } else {
                    (e.code(), e.to_string())
                }
            }
            AppError::Internal => ("internal", "internal server error".into()),
        };

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };
        let mut response = (status, Json(body)).into_response();

        if let Some((limit, retry_after, reset_at)) = rate_limit {
            let retry_secs = retry_after.as_secs().max(1);
            let reset = reset_at
                .map(|at| at.timestamp())
                .unwrap_or_else(|| Utc::now().timestamp() + retry_secs as i64);
            let headers = response.headers_mut();
            for (name, value) in [
                (header::RETRY_AFTER, header_value(retry_secs)),
                (X_RATELIMIT_LIMIT, header_value(limit)),
                (X_RATELIMIT_REMAINING, header_value(0)),
                (X_RATELIMIT_RESET, header_value(reset)),
            ] {
                if let Some(value) = value {
                    headers.insert(name, value);
                }
            }
        }

        response
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        AppError::Auth(e)
    }
}

impl From<RateLimitError> for AppError {
    fn from(e: RateLimitError) -> Self {
        match e {
            RateLimitError::Exceeded {
                limit,
                retry_after,
                reset_at,
                ..
            } => AppError::RateLimited {
                limit,
                retry_after,
                reset_at: Some(reset_at),
            },
            RateLimitError::Backend(e) => {
                error!(error = %e, "rate limit store failure");
                AppError::Internal
            }
        }
    }
}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        error!(error = %e, "repository failure");
        AppError::Internal
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        error!(error = %e, "configuration error");
        AppError::Internal
    }
}
