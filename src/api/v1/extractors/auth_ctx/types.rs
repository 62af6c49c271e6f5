/*
 * Responsibility
 * - Handler から見える「認証済みコンテキスト」の型
 * - middleware が access token を検証して request extensions に格納し、handler はこの型だけを受け取る
 */
use uuid::Uuid;

use crate::services::auth::claims::AuthClaims;
use crate::services::auth::principal::PrincipalType;

/// Verified bearer identity attached to a request.
///
/// - `claims` is the claim set of the access token (roles/permissions per plane)
/// - `jti` identifies the access token; impersonation sessions are keyed by it
#[derive(Debug, Clone)]
pub struct AuthCtx {
    pub claims: AuthClaims,
    pub jti: Uuid,
}

impl AuthCtx {
    pub fn new(claims: AuthClaims, jti: Uuid) -> Self {
        Self { claims, jti }
    }

    pub fn user_id(&self) -> Uuid {
        self.claims.sub
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        self.claims.tenant_id
    }

    pub fn is_system(&self) -> bool {
        self.claims.principal_type == PrincipalType::System
    }
}
