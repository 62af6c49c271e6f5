use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repos::error::RepoResult;
use crate::services::auth::claims::{Permission, Role, SystemRoleSource, TenantRoleSource};

/// Role and permission assignments for both planes.
///
/// The two trait impls never touch each other's tables.
#[derive(Clone, Debug)]
pub struct RoleRepo {
    pool: PgPool,
}

impl RoleRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct PermissionRow {
    resource: String,
    action: String,
}

impl From<RoleRow> for Role {
    fn from(r: RoleRow) -> Self {
        Role {
            id: r.id,
            name: r.name,
        }
    }
}

impl From<PermissionRow> for Permission {
    fn from(p: PermissionRow) -> Self {
        Permission::new(p.resource, p.action)
    }
}

#[async_trait]
impl SystemRoleSource for RoleRepo {
    async fn system_roles(&self, user_id: Uuid) -> RepoResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT r.id, r.name
            FROM system_role_assignments a
            JOIN system_roles r ON r.id = a.role_id
            WHERE a.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn system_role_permissions(&self, role_id: Uuid) -> RepoResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT resource, action
            FROM system_role_permissions
            WHERE role_id = $1
            "#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }
}

#[async_trait]
impl TenantRoleSource for RoleRepo {
    async fn tenant_roles(&self, tenant_id: Uuid, user_id: Uuid) -> RepoResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT r.id, r.name
            FROM tenant_role_assignments a
            JOIN tenant_roles r ON r.id = a.role_id AND r.tenant_id = a.tenant_id
            WHERE a.tenant_id = $1
                AND a.user_id = $2
            ORDER BY r.name
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn tenant_role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> RepoResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT p.resource, p.action
            FROM tenant_role_permissions p
            JOIN tenant_roles r ON r.id = p.role_id
            WHERE r.tenant_id = $1
                AND p.role_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }
}
