/*
 * Responsibility
 * - POST /auth/login, /auth/refresh, /auth/revoke, /auth/logout-all
 * - GET /auth/me
 */
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use tracing::info;

use crate::api::v1::dto::auth::{LoginBody, LoginResponse, MeResponse, RefreshTokenBody, TokenResponse};
use crate::api::v1::extractors::{AuthCtxExtractor, ClientMeta};
use crate::error::AppError;
use crate::services::audit::{AuditAction, AuditEvent};
use crate::services::auth::{LoginOutcome, LoginRequest};
use crate::state::AppState;

pub async fn login(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(body): Json<LoginBody>,
) -> Result<Json<LoginResponse>, AppError> {
    let outcome = state
        .auth
        .login
        .login(LoginRequest {
            username: body.username,
            password: body.password,
            tenant_id: body.tenant_id,
            remember_me: body.remember_me,
            source_ip: meta.ip,
        })
        .await?;

    let response = match outcome {
        LoginOutcome::MfaRequired {
            mfa_session_id,
            expires_at,
        } => LoginResponse::mfa_required(mfa_session_id, expires_at),
        LoginOutcome::Authenticated(tokens) => LoginResponse::authenticated(*tokens),
    };
    Ok(Json(response))
}

pub async fn refresh(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(body): Json<RefreshTokenBody>,
) -> Result<Json<TokenResponse>, AppError> {
    match state.auth.tokens.rotate_refresh_token(&body.refresh_token).await {
        Ok(tokens) => {
            state.audit.publish(
                AuditEvent::success(AuditAction::TokenRefresh)
                    .actor(tokens.claims.sub)
                    .tenant(tokens.claims.tenant_id)
                    .source_ip(meta.ip),
            );
            Ok(Json(tokens.into()))
        }
        Err(e) => {
            state.audit.publish(
                AuditEvent::failure(AuditAction::TokenRefresh, e.code()).source_ip(meta.ip),
            );
            Err(e.into())
        }
    }
}

pub async fn revoke(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(body): Json<RefreshTokenBody>,
) -> Result<StatusCode, AppError> {
    state.auth.tokens.revoke_token(&body.refresh_token).await?;
    state
        .audit
        .publish(AuditEvent::success(AuditAction::TokenRevoke).source_ip(meta.ip));
    Ok(StatusCode::NO_CONTENT)
}

pub async fn logout_all(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
    meta: ClientMeta,
) -> Result<StatusCode, AppError> {
    if ctx.claims.is_impersonated() {
        return Err(AppError::Forbidden);
    }

    let revoked = state.auth.tokens.revoke_all_for_user(ctx.user_id()).await?;
    state.audit.publish(
        AuditEvent::success(AuditAction::LogoutAll)
            .actor(ctx.user_id())
            .tenant(ctx.tenant_id())
            .source_ip(meta.ip)
            .reason(format!("revoked={revoked}")),
    );
    info!(user_id = %ctx.user_id(), revoked, "logout-all");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(AuthCtxExtractor(ctx): AuthCtxExtractor) -> Json<MeResponse> {
    let claims = ctx.claims;
    Json(MeResponse {
        user_id: claims.sub,
        username: claims.username,
        email: claims.email,
        principal_type: claims.principal_type.as_str(),
        tenant_id: claims.tenant_id,
        scope: claims.scope,
        amr: claims.amr,
        impersonated_by: claims.impersonated_by,
    })
}
