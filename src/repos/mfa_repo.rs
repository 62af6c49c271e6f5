use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::repos::error::{RepoError, RepoResult};
use crate::services::auth::mfa::{MfaEnrollmentStore, MfaFactorStore};

#[derive(Clone, Debug)]
pub struct MfaRepo {
    pool: PgPool,
}

impl MfaRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn replace_codes(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    hashes: &[Vec<u8>],
    now: DateTime<Utc>,
) -> RepoResult<()> {
    sqlx::query("DELETE FROM mfa_recovery_codes WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    for hash in hashes {
        sqlx::query(
            r#"
            INSERT INTO mfa_recovery_codes (user_id, code_hash, created_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(hash)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(RepoError::from_sqlx)?;
    }
    Ok(())
}

#[async_trait]
impl MfaFactorStore for MfaRepo {
    async fn totp_secret(&self, user_id: Uuid) -> RepoResult<Option<String>> {
        let secret = sqlx::query_scalar::<_, Option<String>>(
            r#"
            SELECT secret
            FROM mfa_totp_secrets
            WHERE user_id = $1
                AND confirmed_at IS NOT NULL
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(secret.flatten())
    }

    async fn consume_recovery_code(
        &self,
        user_id: Uuid,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> RepoResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE mfa_recovery_codes
            SET used_at = $3
            WHERE user_id = $1
                AND code_hash = $2
                AND used_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(code_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }
}

#[async_trait]
impl MfaEnrollmentStore for MfaRepo {
    async fn save_pending_totp(
        &self,
        user_id: Uuid,
        secret: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO mfa_totp_secrets (user_id, pending_secret, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET pending_secret = EXCLUDED.pending_secret,
                          updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(secret)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn pending_totp(&self, user_id: Uuid) -> RepoResult<Option<String>> {
        let secret = sqlx::query_scalar::<_, Option<String>>(
            "SELECT pending_secret FROM mfa_totp_secrets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(secret.flatten())
    }

    async fn activate_totp(
        &self,
        user_id: Uuid,
        recovery_code_hashes: &[Vec<u8>],
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        let promoted = sqlx::query(
            r#"
            UPDATE mfa_totp_secrets
            SET secret = pending_secret,
                pending_secret = NULL,
                confirmed_at = $2,
                updated_at = $2
            WHERE user_id = $1
                AND pending_secret IS NOT NULL
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if promoted.rows_affected() != 1 {
            // Another request confirmed or restarted enrollment in between.
            return Err(RepoError::Conflict);
        }

        sqlx::query("UPDATE principals SET mfa_enabled = true WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        replace_codes(&mut tx, user_id, recovery_code_hashes, now).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn replace_recovery_codes(
        &self,
        user_id: Uuid,
        recovery_code_hashes: &[Vec<u8>],
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        replace_codes(&mut tx, user_id, recovery_code_hashes, now).await?;
        tx.commit().await?;
        Ok(())
    }
}
