use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::repos::error::{RepoError, RepoResult};
use crate::services::auth::credentials::{Credential, CredentialStore, LockoutPolicy};

#[derive(Clone, Debug)]
pub struct CredentialRepo {
    pool: PgPool,
}

impl CredentialRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CredentialRow {
    pub user_id: Uuid,
    pub password_hash: String,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = RepoError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        let failed_login_attempts = u32::try_from(row.failed_login_attempts).map_err(|_| {
            RepoError::Decode(format!(
                "negative failed_login_attempts for {}",
                row.user_id
            ))
        })?;
        Ok(Credential {
            user_id: row.user_id,
            password_hash: row.password_hash,
            failed_login_attempts,
            locked_until: row.locked_until,
        })
    }
}

#[async_trait]
impl CredentialStore for CredentialRepo {
    async fn credential(&self, user_id: Uuid) -> RepoResult<Option<Credential>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT user_id, password_hash, failed_login_attempts, locked_until
            FROM credentials
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Credential::try_from).transpose()
    }

    async fn record_failure(
        &self,
        user_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> RepoResult<Credential> {
        // One statement: every SET expression reads the pre-update row, and the row
        // lock serializes concurrent failures.
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            UPDATE credentials
            SET failed_login_attempts = CASE
                    WHEN locked_until IS NOT NULL AND locked_until < $2 THEN 1
                    ELSE failed_login_attempts + 1
                END,
                locked_until = CASE
                    WHEN locked_until IS NOT NULL AND locked_until >= $2 THEN locked_until
                    WHEN (CASE
                            WHEN locked_until IS NOT NULL AND locked_until < $2 THEN 1
                            ELSE failed_login_attempts + 1
                          END) >= $3 THEN $4
                    ELSE NULL
                END,
                updated_at = $2
            WHERE user_id = $1
            RETURNING user_id, password_hash, failed_login_attempts, locked_until
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(i32::try_from(policy.threshold).unwrap_or(i32::MAX))
        .bind(now + policy.duration)
        .fetch_one(&self.pool)
        .await?;

        Credential::try_from(row)
    }

    async fn record_success(&self, user_id: Uuid) -> RepoResult<()> {
        sqlx::query(
            r#"
            UPDATE credentials
            SET failed_login_attempts = 0,
                locked_until = NULL,
                updated_at = now()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
