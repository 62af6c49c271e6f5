//! Per-category request limiting.
//!
//! Every request is counted against its source IP, plus its client (`X-Client-Id`)
//! when declared, plus its user (bearer `sub`) when the access layer ran first.
//! Any exhausted counter rejects with `429` and `Retry-After`; admitted responses
//! carry `X-RateLimit-*` for the counter with the least headroom.

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
};
use chrono::Utc;
use tracing::warn;

use crate::api::v1::extractors::AuthCtx;
use crate::api::v1::extractors::client_meta::{client_id, client_ip};
use crate::error::{AppError, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
use crate::services::rate_limit::{LimitCategory, LimitType, RateLimitError, RateLimitStatus};
use crate::state::AppState;

#[derive(Clone)]
struct Guard {
    state: AppState,
    category: LimitCategory,
}

/// Count every request to `router` against `category`.
pub fn apply(router: Router<AppState>, state: AppState, category: LimitCategory) -> Router<AppState> {
    router.route_layer(middleware::from_fn_with_state(
        Guard { state, category },
        rate_limit_middleware,
    ))
}

/// Every counter this request is charged to.
fn subjects(req: &Request<Body>, state: &AppState) -> Vec<(LimitType, String)> {
    let ip = client_ip(req.headers(), req.extensions(), &state.trusted_proxies)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut subjects = vec![(LimitType::Ip, ip)];
    if let Some(id) = client_id(req.headers()) {
        subjects.push((LimitType::Client, id));
    }
    if let Some(ctx) = req.extensions().get::<AuthCtx>() {
        subjects.push((LimitType::User, ctx.user_id().to_string()));
    }
    subjects
}

async fn rate_limit_middleware(
    State(guard): State<Guard>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let now = Utc::now();
    let limiter = &guard.state.rate_limiter;

    let mut tightest: Option<RateLimitStatus> = None;
    let mut rejected: Option<RateLimitError> = None;

    for (limit_type, identifier) in subjects(&req, &guard.state) {
        match limiter.check(limit_type, &identifier, guard.category, now).await {
            Ok(status) => {
                if tightest.is_none_or(|t| status.remaining < t.remaining) {
                    tightest = Some(status);
                }
            }
            Err(RateLimitError::Exceeded {
                limit,
                current,
                retry_after,
                reset_at,
            }) => {
                warn!(
                    limit_type = limit_type.as_str(),
                    category = guard.category.as_str(),
                    limit,
                    current,
                    "rate limit exceeded"
                );
                let longer = match &rejected {
                    Some(RateLimitError::Exceeded {
                        retry_after: prev, ..
                    }) => retry_after > *prev,
                    _ => true,
                };
                if longer {
                    rejected = Some(RateLimitError::Exceeded {
                        limit,
                        current,
                        retry_after,
                        reset_at,
                    });
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(exceeded) = rejected {
        return Err(exceeded.into());
    }

    let mut response = next.run(req).await;
    if let Some(status) = tightest {
        let headers = response.headers_mut();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(status.reset_at.timestamp()));
    }
    Ok(response)
}
