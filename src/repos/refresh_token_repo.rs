use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::repos::error::{RepoError, RepoResult};
use crate::services::auth::refresh_token_issuer::{
    NewRefreshToken, RefreshTokenRecord, RefreshTokenStore,
};

/// DB access for refresh token persistence.
///
/// Notes:
/// - We store only a SHA-256 hash of the refresh token (opaque token design).
/// - Revocation is a conditional UPDATE (`revoked_at IS NULL`), so concurrent
///   rotations of the same token cannot both succeed.
#[derive(Clone, Debug)]
pub struct RefreshTokenRepo {
    pool: PgPool,
}

impl RefreshTokenRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remember_me: bool,
    pub mfa_verified: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<Uuid>,
    pub impersonation_session_id: Option<Uuid>,
    pub impersonated_by: Option<Uuid>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(r: RefreshTokenRow) -> Self {
        RefreshTokenRecord {
            id: r.id,
            user_id: r.user_id,
            tenant_id: r.tenant_id,
            issued_at: r.issued_at,
            expires_at: r.expires_at,
            remember_me: r.remember_me,
            mfa_verified: r.mfa_verified,
            revoked_at: r.revoked_at,
            replaced_by: r.replaced_by,
            impersonation_session_id: r.impersonation_session_id,
            impersonated_by: r.impersonated_by,
        }
    }
}

#[async_trait]
impl RefreshTokenStore for RefreshTokenRepo {
    async fn insert(&self, token: NewRefreshToken) -> RepoResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO refresh_tokens (
                token_hash,
                user_id,
                tenant_id,
                issued_at,
                expires_at,
                remember_me,
                mfa_verified,
                impersonation_session_id,
                impersonated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(token.token_hash)
        .bind(token.user_id)
        .bind(token.tenant_id)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .bind(token.remember_me)
        .bind(token.mfa_verified)
        .bind(token.impersonation_session_id)
        .bind(token.impersonated_by)
        .fetch_one(&self.pool)
        .await
        .map_err(RepoError::from_sqlx)?;

        Ok(id)
    }

    async fn revoke_active_by_hash(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> RepoResult<Option<RefreshTokenRecord>> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $2
            WHERE token_hash = $1
                AND revoked_at IS NULL
                AND expires_at > $2
            RETURNING
                id,
                user_id,
                tenant_id,
                issued_at,
                expires_at,
                remember_me,
                mfa_verified,
                revoked_at,
                replaced_by,
                impersonation_session_id,
                impersonated_by
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RefreshTokenRecord::from))
    }

    async fn set_replaced_by(&self, id: Uuid, replaced_by: Uuid) -> RepoResult<u64> {
        let done = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET replaced_by = $2
            WHERE id = $1
                AND replaced_by IS NULL
            "#,
        )
        .bind(id)
        .bind(replaced_by)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> RepoResult<u64> {
        let done = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $2
            WHERE user_id = $1
                AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected())
    }

    async fn revoke_for_impersonation_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> RepoResult<u64> {
        let done = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $2
            WHERE impersonation_session_id = $1
                AND revoked_at IS NULL
            "#,
        )
        .bind(session_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected())
    }
}
