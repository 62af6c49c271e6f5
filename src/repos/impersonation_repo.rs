use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::repos::error::{RepoError, RepoResult};
use crate::services::auth::impersonation::{
    ImpersonationSession, ImpersonationSessionStore, NewImpersonationSession,
};

#[derive(Clone, Debug)]
pub struct ImpersonationRepo {
    pool: PgPool,
}

impl ImpersonationRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ImpersonationSessionRow {
    pub id: Uuid,
    pub impersonator_id: Uuid,
    pub target_user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub ended_by: Option<Uuid>,
    pub token_jti: Option<Uuid>,
    pub reason: Option<String>,
    pub metadata: Json<serde_json::Value>,
}

impl From<ImpersonationSessionRow> for ImpersonationSession {
    fn from(r: ImpersonationSessionRow) -> Self {
        ImpersonationSession {
            id: r.id,
            impersonator_id: r.impersonator_id,
            target_user_id: r.target_user_id,
            tenant_id: r.tenant_id,
            started_at: r.started_at,
            ended_at: r.ended_at,
            ended_by: r.ended_by,
            token_jti: r.token_jti,
            reason: r.reason,
            metadata: r.metadata.0,
        }
    }
}

const COLUMNS: &str = r#"
    id,
    impersonator_id,
    target_user_id,
    tenant_id,
    started_at,
    ended_at,
    ended_by,
    token_jti,
    reason,
    metadata
"#;

#[async_trait]
impl ImpersonationSessionStore for ImpersonationRepo {
    async fn insert(&self, session: NewImpersonationSession) -> RepoResult<ImpersonationSession> {
        let sql = format!(
            r#"
            WITH inserted AS (
                INSERT INTO impersonation_sessions (
                    id,
                    impersonator_id,
                    target_user_id,
                    tenant_id,
                    started_at,
                    token_jti,
                    reason,
                    metadata
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING {COLUMNS}
            ),
            first_token AS (
                INSERT INTO impersonation_session_tokens (jti, session_id, issued_at)
                SELECT token_jti, id, started_at FROM inserted
            )
            SELECT {COLUMNS} FROM inserted
            "#
        );
        let row = sqlx::query_as::<_, ImpersonationSessionRow>(&sql)
            .bind(session.id)
            .bind(session.impersonator_id)
            .bind(session.target_user_id)
            .bind(session.tenant_id)
            .bind(session.started_at)
            .bind(session.token_jti)
            .bind(session.reason)
            .bind(Json(session.metadata))
            .fetch_one(&self.pool)
            .await
            .map_err(RepoError::from_sqlx)?;

        Ok(row.into())
    }

    async fn find(&self, id: Uuid) -> RepoResult<Option<ImpersonationSession>> {
        let sql = format!("SELECT {COLUMNS} FROM impersonation_sessions WHERE id = $1");
        let row = sqlx::query_as::<_, ImpersonationSessionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn find_by_jti(&self, jti: Uuid) -> RepoResult<Option<ImpersonationSession>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM impersonation_sessions
            WHERE id = (
                SELECT session_id FROM impersonation_session_tokens WHERE jti = $1
            )
            "#
        );
        let row = sqlx::query_as::<_, ImpersonationSessionRow>(&sql)
            .bind(jti)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn record_token(&self, id: Uuid, jti: Uuid, now: DateTime<Utc>) -> RepoResult<bool> {
        // The row lock taken by the UPDATE orders this against a concurrent end().
        let result = sqlx::query(
            r#"
            WITH active AS (
                UPDATE impersonation_sessions
                SET token_jti = $2
                WHERE id = $1
                    AND ended_at IS NULL
                RETURNING id
            )
            INSERT INTO impersonation_session_tokens (jti, session_id, issued_at)
            SELECT $2, id, $3 FROM active
            "#,
        )
        .bind(id)
        .bind(jti)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(RepoError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn end(
        &self,
        id: Uuid,
        ended_by: Uuid,
        now: DateTime<Utc>,
    ) -> RepoResult<Option<ImpersonationSession>> {
        // Ended sessions are immutable: only an active row matches.
        let sql = format!(
            r#"
            UPDATE impersonation_sessions
            SET ended_at = $3,
                ended_by = $2
            WHERE id = $1
                AND ended_at IS NULL
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ImpersonationSessionRow>(&sql)
            .bind(id)
            .bind(ended_by)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn active_for_impersonator(
        &self,
        impersonator_id: Uuid,
    ) -> RepoResult<Vec<ImpersonationSession>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM impersonation_sessions
            WHERE impersonator_id = $1
                AND ended_at IS NULL
            ORDER BY started_at DESC
            "#
        );
        let rows = sqlx::query_as::<_, ImpersonationSessionRow>(&sql)
            .bind(impersonator_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
