use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repos::error::{RepoError, RepoResult};
use crate::services::auth::token_service::{TokenLifetimes, TokenSettingsSource, TokenTtls};

#[derive(Clone, Debug)]
pub struct TenantSettingsRepo {
    pool: PgPool,
}

impl TenantSettingsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TenantTokenSettingsRow {
    pub access_token_ttl_seconds: i32,
    pub id_token_ttl_seconds: i32,
    pub refresh_token_ttl_seconds: i32,
    pub remember_me_access_token_ttl_seconds: i32,
    pub remember_me_id_token_ttl_seconds: i32,
    pub remember_me_refresh_token_ttl_seconds: i32,
}

fn seconds(column: &str, v: i32) -> RepoResult<u64> {
    u64::try_from(v).map_err(|_| RepoError::Decode(format!("{column} = {v}")))
}

impl TryFrom<TenantTokenSettingsRow> for TokenTtls {
    type Error = RepoError;

    fn try_from(r: TenantTokenSettingsRow) -> Result<Self, Self::Error> {
        Ok(TokenTtls {
            standard: TokenLifetimes {
                access_seconds: seconds("access_token_ttl_seconds", r.access_token_ttl_seconds)?,
                id_seconds: seconds("id_token_ttl_seconds", r.id_token_ttl_seconds)?,
                refresh_seconds: seconds("refresh_token_ttl_seconds", r.refresh_token_ttl_seconds)?,
            },
            remember_me: TokenLifetimes {
                access_seconds: seconds(
                    "remember_me_access_token_ttl_seconds",
                    r.remember_me_access_token_ttl_seconds,
                )?,
                id_seconds: seconds(
                    "remember_me_id_token_ttl_seconds",
                    r.remember_me_id_token_ttl_seconds,
                )?,
                refresh_seconds: seconds(
                    "remember_me_refresh_token_ttl_seconds",
                    r.remember_me_refresh_token_ttl_seconds,
                )?,
            },
        })
    }
}

#[async_trait]
impl TokenSettingsSource for TenantSettingsRepo {
    async fn token_ttls(&self, tenant_id: Uuid) -> RepoResult<Option<TokenTtls>> {
        let row = sqlx::query_as::<_, TenantTokenSettingsRow>(
            r#"
            SELECT
                access_token_ttl_seconds,
                id_token_ttl_seconds,
                refresh_token_ttl_seconds,
                remember_me_access_token_ttl_seconds,
                remember_me_id_token_ttl_seconds,
                remember_me_refresh_token_ttl_seconds
            FROM tenant_token_settings
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TokenTtls::try_from).transpose()
    }
}
