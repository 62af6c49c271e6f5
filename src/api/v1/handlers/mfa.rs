/*
 * Responsibility
 * - POST /mfa/challenge/verify (second login step)
 * - POST /mfa/totp/enroll, /mfa/totp/confirm, /mfa/recovery-codes/regenerate
 */
use axum::Json;
use axum::extract::State;
use chrono::Utc;

use crate::api::v1::dto::auth::TokenResponse;
use crate::api::v1::dto::mfa::{
    ConfirmTotpBody, RecoveryCodesResponse, TotpEnrollmentResponse, VerifyChallengeBody,
};
use crate::api::v1::extractors::{AuthCtx, AuthCtxExtractor, ClientMeta};
use crate::error::AppError;
use crate::services::audit::{AuditAction, AuditEvent};
use crate::services::auth::AuthError;
use crate::services::auth::principal::Principal;
use crate::state::AppState;

pub async fn verify_challenge(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(body): Json<VerifyChallengeBody>,
) -> Result<Json<TokenResponse>, AppError> {
    let tokens = state
        .auth
        .login
        .complete_mfa(&body.session_id, &body.code, body.tenant_id, meta.ip)
        .await?;
    Ok(Json(tokens.into()))
}

/// The caller's own principal record. Impersonated tokens may not manage factors.
async fn own_principal(state: &AppState, ctx: &AuthCtx) -> Result<Principal, AppError> {
    if ctx.claims.is_impersonated() {
        return Err(AppError::Forbidden);
    }
    let principal = state
        .auth
        .principals
        .find_by_id(ctx.user_id())
        .await?
        .ok_or(AuthError::PrincipalNotFound)?;
    if !principal.is_active() {
        return Err(AuthError::AccountInactive.into());
    }
    Ok(principal)
}

pub async fn enroll_totp(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
) -> Result<Json<TotpEnrollmentResponse>, AppError> {
    let principal = own_principal(&state, &ctx).await?;
    let enrollment = state
        .auth
        .mfa_enrollment
        .begin(&principal, Utc::now())
        .await?;

    Ok(Json(TotpEnrollmentResponse {
        secret: enrollment.secret,
        otpauth_url: enrollment.otpauth_url,
    }))
}

pub async fn confirm_totp(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
    meta: ClientMeta,
    Json(body): Json<ConfirmTotpBody>,
) -> Result<Json<RecoveryCodesResponse>, AppError> {
    let principal = own_principal(&state, &ctx).await?;
    let result = state
        .auth
        .mfa_enrollment
        .confirm(&principal, &body.code, Utc::now())
        .await;

    let event = match &result {
        Ok(_) => AuditEvent::success(AuditAction::MfaEnroll),
        Err(e) => AuditEvent::failure(AuditAction::MfaEnroll, e.code()),
    };
    state.audit.publish(
        event
            .actor(principal.id)
            .tenant(principal.tenant_id())
            .source_ip(meta.ip),
    );

    Ok(Json(RecoveryCodesResponse {
        recovery_codes: result?,
    }))
}

pub async fn regenerate_recovery_codes(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
    meta: ClientMeta,
) -> Result<Json<RecoveryCodesResponse>, AppError> {
    let principal = own_principal(&state, &ctx).await?;
    let codes = state
        .auth
        .mfa_enrollment
        .regenerate_recovery_codes(&principal, Utc::now())
        .await?;

    state.audit.publish(
        AuditEvent::success(AuditAction::MfaEnroll)
            .actor(principal.id)
            .tenant(principal.tenant_id())
            .source_ip(meta.ip)
            .reason("recovery codes regenerated"),
    );
    Ok(Json(RecoveryCodesResponse {
        recovery_codes: codes,
    }))
}
