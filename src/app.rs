/*
 * Responsibility
 * - tracing / panic hook の初期化
 * - Config読み込み → 依存生成 (PgPool, cache, audit queue, auth services) → Router 組み立て
 * - axum::serve() で起動, 終了時に audit queue を drain
 */
use anyhow::{Context, Result};
use axum::{Router, routing::get};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::time::Duration;
use std::{panic, process, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::api::v1::extractors::client_meta::TrustedProxies;
use crate::config::Config;
use crate::middleware;
use crate::services::audit::{AuditQueue, TracingAuditSink};
use crate::services::auth::{AuthSettings, AuthStores, build_auth_services};
use crate::services::cache::CacheBackend;
use crate::services::rate_limit::RateLimiter;
use crate::state::AppState;

fn init_tracing() {
    // RUST_LOG=info,tenant_auth=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        tracing::error!(?info, "panic");

        // Development: crash the whole process so the panic is noticed.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();
    let config = Config::from_env()?;

    init_panic_hook(!config.app_env.is_production());

    tracing::info!(
        "starting auth service in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let state = build_state(&config).await?;
    let audit = state.audit.clone();
    let app = build_router(state, config.request_timeout);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("bind {}", config.addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    audit.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn build_state(config: &Config) -> Result<AppState> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .context("connect to postgres")?;

    let cache =
        CacheBackend::connect(config.valkey_url.as_deref(), config.cache_sweep_interval).await;

    let audit = Arc::new(AuditQueue::start(
        Arc::new(TracingAuditSink),
        config.audit_queue_capacity,
        config.audit_workers,
    ));

    let auth = build_auth_services(
        &AuthSettings::from_config(config),
        AuthStores::postgres(pool),
        cache.clone(),
        audit.clone(),
    )
    .context("build auth services")?;

    let rate_limiter = RateLimiter::new(cache, config.rate_limits);

    Ok(AppState::new(Arc::new(auth), rate_limiter, audit)
        .with_trusted_proxies(TrustedProxies::new(config.trusted_proxies.iter().copied())))
}

/// The full HTTP surface: `/health` plus `/api/v1`, wrapped in the transport layers.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    async fn health() -> &'static str {
        "ok"
    }

    let router = Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api::v1::routes(state.clone()))
        .with_state(state);

    middleware::http::apply(router, request_timeout)
}
