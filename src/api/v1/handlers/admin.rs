/*
 * Responsibility
 * - GET/DELETE /admin/rate-limits/{limit_type}/{category}/{identifier}
 * - GET /admin/audit/stats
 * - SYSTEM principal のみ
 */
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;

use crate::api::v1::extractors::{AuthCtx, AuthCtxExtractor, ClientMeta};
use crate::error::AppError;
use crate::services::audit::{AuditAction, AuditEvent, AuditStats};
use crate::services::rate_limit::{LimitCategory, LimitType, RateLimitUsage};
use crate::state::AppState;

fn require_system(ctx: &AuthCtx) -> Result<(), AppError> {
    if ctx.is_system() && !ctx.claims.is_impersonated() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

fn parse_target(
    limit_type: &str,
    category: &str,
) -> Result<(LimitType, LimitCategory), AppError> {
    let limit_type = limit_type
        .parse()
        .map_err(|_| AppError::bad_request("invalid_limit_type", "unknown limit type"))?;
    let category = category
        .parse()
        .map_err(|_| AppError::bad_request("invalid_category", "unknown rate limit category"))?;
    Ok((limit_type, category))
}

pub async fn get_rate_limit(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
    Path((limit_type, category, identifier)): Path<(String, String, String)>,
) -> Result<Json<RateLimitUsage>, AppError> {
    require_system(&ctx)?;
    let (limit_type, category) = parse_target(&limit_type, &category)?;

    let usage = state
        .rate_limiter
        .get_usage(limit_type, &identifier, category, Utc::now())
        .await?;
    Ok(Json(usage))
}

pub async fn reset_rate_limit(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
    meta: ClientMeta,
    Path((limit_type, category, identifier)): Path<(String, String, String)>,
) -> Result<StatusCode, AppError> {
    require_system(&ctx)?;
    let (limit_type, category) = parse_target(&limit_type, &category)?;

    state
        .rate_limiter
        .reset_limit(limit_type, &identifier, category, Utc::now())
        .await?;

    state.audit.publish(
        AuditEvent::success(AuditAction::RateLimitReset)
            .actor(ctx.user_id())
            .source_ip(meta.ip)
            .reason(format!(
                "{}:{}:{}",
                limit_type.as_str(),
                category.as_str(),
                identifier
            )),
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn audit_stats(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
) -> Result<Json<AuditStats>, AppError> {
    require_system(&ctx)?;
    Ok(Json(state.audit.stats()))
}
