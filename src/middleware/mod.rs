/*
 * Responsibility
 * - middleware の公開インターフェース
 * - http: request id / trace / body limit / timeout
 * - auth: bearer access token
 * - rate_limit: per-category counters
 */
pub mod auth;
pub mod http;
pub mod rate_limit;
