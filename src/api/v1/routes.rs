/*
 * Responsibility
 * - v1 の URL 構造を定義
 * - rate limit category と bearer の要否を route group ごとに適用する
 *
 * Layer order: route_layer は後から足したものが外側になる。
 * bearer group は access → rate_limit の順で通るので、user 単位で数えられる。
 */
use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::api::v1::handlers::{admin, auth, health::health, impersonation, mfa};
use crate::middleware;
use crate::services::rate_limit::LimitCategory;
use crate::state::AppState;

fn bearer(router: Router<AppState>, state: &AppState, category: LimitCategory) -> Router<AppState> {
    let router = middleware::rate_limit::apply(router, state.clone(), category);
    middleware::auth::access::apply(router, state.clone())
}

pub fn routes(state: AppState) -> Router<AppState> {
    let public_auth = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/revoke", post(auth::revoke))
        .route("/mfa/challenge/verify", post(mfa::verify_challenge));
    let public_auth = middleware::rate_limit::apply(public_auth, state.clone(), LimitCategory::Auth);

    let general = bearer(
        Router::new().route("/auth/me", get(auth::me)),
        &state,
        LimitCategory::General,
    );

    let sensitive = bearer(
        Router::new()
            .route("/auth/logout-all", post(auth::logout_all))
            .route("/mfa/totp/enroll", post(mfa::enroll_totp))
            .route("/mfa/totp/confirm", post(mfa::confirm_totp))
            .route(
                "/mfa/recovery-codes/regenerate",
                post(mfa::regenerate_recovery_codes),
            ),
        &state,
        LimitCategory::Sensitive,
    );

    let admin = bearer(
        Router::new()
            .route("/impersonation", post(impersonation::start))
            .route("/impersonation/{session_id}", delete(impersonation::end))
            .route("/impersonation/end-by-token", post(impersonation::end_by_token))
            .route("/impersonation/active", get(impersonation::active))
            .route(
                "/admin/rate-limits/{limit_type}/{category}/{identifier}",
                get(admin::get_rate_limit).delete(admin::reset_rate_limit),
            )
            .route("/admin/audit/stats", get(admin::audit_stats)),
        &state,
        LimitCategory::Admin,
    );

    Router::new()
        .route("/health", get(health))
        .merge(public_auth)
        .merge(general)
        .merge(sensitive)
        .merge(admin)
}
