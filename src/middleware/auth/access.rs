//! Bearer access token 検証 → AuthCtx を extensions に入れる
//!
//! - `Authorization: Bearer <jwt>` の署名 + iss/aud/exp/nbf/token_use を検証
//! - impersonation token は session が終了していれば拒否する

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::{self, Next},
    response::Response,
};
use tracing::{debug, warn};

use crate::api::v1::extractors::AuthCtx;
use crate::error::AppError;
use crate::services::auth::AuthError;
use crate::state::AppState;

/// Require a valid access token on every route of `router`.
///
/// Applied with `route_layer`, so unmatched paths still answer 404.
pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    router.route_layer(middleware::from_fn_with_state(state, access_middleware))
}

fn bearer(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn access_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer(&req).ok_or(AppError::Unauthorized)?;

    let verified = match state.auth.tokens.verify_access_token(token) {
        Ok(verified) => verified,
        Err(err) => {
            warn!(error = %err, "access token verification failed");
            return Err(AppError::Unauthorized);
        }
    };

    if let Some(session_id) = verified.claims.impersonation_session_id {
        match state.auth.impersonation.find_session(session_id).await {
            Ok(session) if session.is_active() => {}
            Ok(_) | Err(AuthError::ImpersonationSessionNotFound) => {
                debug!(session_id = %session_id, "impersonation session no longer active");
                return Err(AppError::Unauthorized);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let auth_ctx = AuthCtx::new(verified.claims, verified.jti);
    req.extensions_mut().insert(auth_ctx);

    Ok(next.run(req).await)
}
