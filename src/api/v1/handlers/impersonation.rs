/*
 * Responsibility
 * - POST /impersonation, DELETE /impersonation/{session_id}
 * - POST /impersonation/end-by-token, GET /impersonation/active
 * - 呼び出し元 plane の impersonate 権限チェック + audit
 */
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::api::v1::dto::impersonation::{
    ActiveSessionsResponse, EndByTokenBody, ImpersonationResponse, StartImpersonationBody,
};
use crate::api::v1::extractors::{AuthCtx, AuthCtxExtractor, ClientMeta};
use crate::error::AppError;
use crate::services::audit::{AuditAction, AuditEvent};
use crate::services::auth::AuthError;
use crate::services::auth::impersonation::{ImpersonationSession, impersonate_permission};
use crate::state::AppState;

const MAX_REASON_LEN: usize = 500;

fn require_impersonate_permission(ctx: &AuthCtx) -> Result<(), AppError> {
    let allowed = !ctx.claims.is_impersonated()
        && impersonate_permission(ctx.claims.principal_type)
            .is_some_and(|permission| ctx.claims.has_permission(permission));
    if allowed {
        Ok(())
    } else {
        warn!(user_id = %ctx.user_id(), "impersonation permission missing");
        Err(AppError::Forbidden)
    }
}

pub async fn start(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
    meta: ClientMeta,
    Json(body): Json<StartImpersonationBody>,
) -> Result<(StatusCode, Json<ImpersonationResponse>), AppError> {
    require_impersonate_permission(&ctx)?;

    let reason = body
        .reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
        return Err(AppError::bad_request("reason_too_long", "reason is too long"));
    }

    let result = state
        .auth
        .impersonation
        .start(ctx.user_id(), body.target_user_id, reason.clone(), Utc::now())
        .await;

    let grant = match result {
        Ok(grant) => grant,
        Err(e) => {
            state.audit.publish(
                AuditEvent::failure(AuditAction::ImpersonationStart, e.code())
                    .actor(ctx.user_id())
                    .target(body.target_user_id)
                    .tenant(ctx.tenant_id())
                    .source_ip(meta.ip),
            );
            return Err(e.into());
        }
    };

    let mut event = AuditEvent::success(AuditAction::ImpersonationStart)
        .actor(ctx.user_id())
        .target(grant.session.target_user_id)
        .tenant(grant.session.tenant_id)
        .source_ip(meta.ip);
    if let Some(reason) = reason {
        event = event.reason(reason);
    }
    state.audit.publish(event);

    Ok((
        StatusCode::CREATED,
        Json(ImpersonationResponse {
            session: grant.session,
            tokens: grant.tokens.into(),
        }),
    ))
}

/// The impersonator, the impersonated token itself, or a SYSTEM principal allowed to
/// impersonate may end a session.
fn may_end(ctx: &AuthCtx, session: &ImpersonationSession) -> bool {
    session.impersonator_id == ctx.user_id()
        || ctx.claims.impersonation_session_id == Some(session.id)
        || (ctx.is_system() && require_impersonate_permission(ctx).is_ok())
}

fn publish_end(
    state: &AppState,
    ctx: &AuthCtx,
    meta: &ClientMeta,
    result: &Result<ImpersonationSession, AuthError>,
) {
    let event = match result {
        Ok(session) => AuditEvent::success(AuditAction::ImpersonationEnd)
            .target(session.target_user_id)
            .tenant(session.tenant_id),
        Err(e) => AuditEvent::failure(AuditAction::ImpersonationEnd, e.code()),
    };
    state
        .audit
        .publish(event.actor(ctx.user_id()).source_ip(meta.ip));
}

pub async fn end(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
    meta: ClientMeta,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ImpersonationSession>, AppError> {
    let session = state.auth.impersonation.find_session(session_id).await?;
    if !may_end(&ctx, &session) {
        return Err(AppError::Forbidden);
    }

    let result = state
        .auth
        .impersonation
        .end(session.id, ctx.user_id(), Utc::now())
        .await;
    publish_end(&state, &ctx, &meta, &result);
    Ok(Json(result?))
}

pub async fn end_by_token(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
    meta: ClientMeta,
    Json(body): Json<EndByTokenBody>,
) -> Result<Json<ImpersonationSession>, AppError> {
    let session = state
        .auth
        .impersonation
        .find_session_by_token(body.jti)
        .await?;
    if !may_end(&ctx, &session) {
        return Err(AppError::Forbidden);
    }

    let result = state
        .auth
        .impersonation
        .end_by_token(body.jti, ctx.user_id(), Utc::now())
        .await;
    publish_end(&state, &ctx, &meta, &result);
    Ok(Json(result?))
}

pub async fn active(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
) -> Result<Json<ActiveSessionsResponse>, AppError> {
    let sessions = state
        .auth
        .impersonation
        .active_sessions(ctx.user_id())
        .await?;
    Ok(Json(ActiveSessionsResponse { sessions }))
}
