use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repos::error::{RepoError, RepoResult};
use crate::services::auth::principal::{
    Principal, PrincipalDirectory, PrincipalKind, PrincipalStatus, PrincipalType,
};

#[derive(Clone, Debug)]
pub struct PrincipalRepo {
    pool: PgPool,
}

impl PrincipalRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PrincipalRow {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub principal_type: String,
    pub username: String,
    pub email: String,
    pub status: String,
    pub mfa_enabled: bool,
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = RepoError;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        let principal_type = PrincipalType::parse(&row.principal_type).ok_or_else(|| {
            RepoError::Decode(format!("principal_type '{}'", row.principal_type))
        })?;
        let kind = PrincipalKind::from_parts(principal_type, row.tenant_id).ok_or_else(|| {
            RepoError::Decode(format!("principal {} tenant/type mismatch", row.id))
        })?;
        let status = PrincipalStatus::parse(&row.status)
            .ok_or_else(|| RepoError::Decode(format!("principal status '{}'", row.status)))?;

        Ok(Principal {
            id: row.id,
            username: row.username,
            email: row.email,
            kind,
            status,
            mfa_enabled: row.mfa_enabled,
        })
    }
}

#[async_trait]
impl PrincipalDirectory for PrincipalRepo {
    async fn find_by_username(
        &self,
        username: &str,
        tenant_id: Option<Uuid>,
    ) -> RepoResult<Option<Principal>> {
        // `IS NOT DISTINCT FROM` matches NULL = NULL, so `None` selects SYSTEM principals only.
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            SELECT
                id,
                tenant_id,
                principal_type,
                username,
                email,
                status,
                mfa_enabled
            FROM principals
            WHERE username = $1
                AND tenant_id IS NOT DISTINCT FROM $2
            LIMIT 1
            "#,
        )
        .bind(username)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Principal::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Principal>> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            SELECT
                id,
                tenant_id,
                principal_type,
                username,
                email,
                status,
                mfa_enabled
            FROM principals
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Principal::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(principal_type: &str, tenant_id: Option<Uuid>) -> PrincipalRow {
        PrincipalRow {
            id: Uuid::new_v4(),
            tenant_id,
            principal_type: principal_type.to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            status: "active".to_string(),
            mfa_enabled: false,
        }
    }

    #[test]
    fn tenant_row_decodes() {
        let t = Uuid::new_v4();
        let p = Principal::try_from(row("TENANT", Some(t))).unwrap();
        assert_eq!(p.kind, PrincipalKind::Tenant { tenant_id: t });
        assert!(p.is_active());
    }

    #[test]
    fn inconsistent_rows_are_decode_errors() {
        assert!(matches!(
            Principal::try_from(row("SYSTEM", Some(Uuid::new_v4()))),
            Err(RepoError::Decode(_))
        ));
        assert!(matches!(
            Principal::try_from(row("ROBOT", None)),
            Err(RepoError::Decode(_))
        ));
    }
}
