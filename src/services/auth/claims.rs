//! Resolve a principal into the claim set embedded in access and ID tokens.
//!
//! SYSTEM and TENANT planes are read from separate sources and never mixed.
//! Output is sorted so the `scope` string is stable across calls.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::repos::error::RepoResult;
use crate::services::auth::error::AuthError;
use crate::services::auth::principal::{Principal, PrincipalKind, PrincipalType};

pub const SYSTEM_SCOPE_MARKER: &str = "system:*";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Permission {
    pub resource: String,
    pub action: String,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// `resource:action`, the dedup key and the claim value.
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}

#[async_trait]
pub trait SystemRoleSource: Send + Sync {
    async fn system_roles(&self, user_id: Uuid) -> RepoResult<Vec<Role>>;
    async fn system_role_permissions(&self, role_id: Uuid) -> RepoResult<Vec<Permission>>;
}

#[async_trait]
pub trait TenantRoleSource: Send + Sync {
    async fn tenant_roles(&self, tenant_id: Uuid, user_id: Uuid) -> RepoResult<Vec<Role>>;
    async fn tenant_role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> RepoResult<Vec<Permission>>;
}

/// Identity and authorization claims, without the registered JWT claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthClaims {
    pub sub: Uuid,
    pub principal_type: PrincipalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub system_roles: Vec<String>,
    #[serde(default)]
    pub system_permissions: Vec<String>,
    pub scope: String,
    #[serde(default)]
    pub amr: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonated_by: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonation_session_id: Option<Uuid>,
}

impl AuthClaims {
    fn base(principal: &Principal) -> Self {
        Self {
            sub: principal.id,
            principal_type: principal.kind.principal_type(),
            tenant_id: principal.tenant_id(),
            email: principal.email.clone(),
            username: principal.username.clone(),
            roles: Vec::new(),
            permissions: Vec::new(),
            system_roles: Vec::new(),
            system_permissions: Vec::new(),
            scope: String::new(),
            amr: Vec::new(),
            impersonated_by: None,
            impersonation_session_id: None,
        }
    }

    /// Mark these (target) claims as issued to `impersonator` under `session_id`.
    pub fn impersonated(mut self, impersonator: Uuid, session_id: Uuid) -> Self {
        self.impersonated_by = Some(impersonator);
        self.impersonation_session_id = Some(session_id);
        self
    }

    pub fn is_impersonated(&self) -> bool {
        self.impersonated_by.is_some()
    }

    /// True when the claim set grants `permission` on the principal's own plane.
    pub fn has_permission(&self, permission: &str) -> bool {
        match self.principal_type {
            PrincipalType::System => self.system_permissions.iter().any(|p| p == permission),
            PrincipalType::Tenant | PrincipalType::Service => {
                self.permissions.iter().any(|p| p == permission)
            }
        }
    }
}

pub fn system_scope(roles: &BTreeSet<String>) -> String {
    std::iter::once(SYSTEM_SCOPE_MARKER.to_string())
        .chain(roles.iter().map(|r| format!("system_role:{r}")))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn tenant_scope(
    tenant_id: Uuid,
    roles: &BTreeSet<String>,
    permissions: &BTreeSet<String>,
) -> String {
    std::iter::once(format!("tenant:{tenant_id}"))
        .chain(roles.iter().map(|r| format!("role:{r}")))
        .chain(permissions.iter().map(|p| format!("perm:{p}")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Clone)]
pub struct ClaimsBuilder {
    system: Arc<dyn SystemRoleSource>,
    tenant: Arc<dyn TenantRoleSource>,
}

impl std::fmt::Debug for ClaimsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimsBuilder").finish_non_exhaustive()
    }
}

impl ClaimsBuilder {
    pub fn new(system: Arc<dyn SystemRoleSource>, tenant: Arc<dyn TenantRoleSource>) -> Self {
        Self { system, tenant }
    }

    /// Build claims from the current role/permission assignments.
    pub async fn build(&self, principal: &Principal) -> Result<AuthClaims, AuthError> {
        match principal.kind {
            PrincipalKind::System => self.build_system(principal).await,
            PrincipalKind::Tenant { tenant_id } | PrincipalKind::Service { tenant_id } => {
                self.build_tenant(principal, tenant_id).await
            }
        }
    }

    async fn build_system(&self, principal: &Principal) -> Result<AuthClaims, AuthError> {
        let roles = self.system.system_roles(principal.id).await.map_err(|e| {
            error!(user_id = %principal.id, error = %e, "failed to load system roles");
            AuthError::Store
        })?;

        let mut role_names = BTreeSet::new();
        let mut permissions = BTreeSet::new();
        for role in &roles {
            role_names.insert(role.name.clone());
            match self.system.system_role_permissions(role.id).await {
                Ok(perms) => permissions.extend(perms.iter().map(Permission::key)),
                Err(e) => {
                    // Skip this role's permissions; the rest still resolve.
                    warn!(user_id = %principal.id, role = %role.name, error = %e, "skipping system role permissions");
                }
            }
        }

        let mut claims = AuthClaims::base(principal);
        claims.scope = system_scope(&role_names);
        claims.system_roles = role_names.into_iter().collect();
        claims.system_permissions = permissions.into_iter().collect();
        Ok(claims)
    }

    async fn build_tenant(
        &self,
        principal: &Principal,
        tenant_id: Uuid,
    ) -> Result<AuthClaims, AuthError> {
        let roles = self
            .tenant
            .tenant_roles(tenant_id, principal.id)
            .await
            .map_err(|e| {
                error!(user_id = %principal.id, tenant_id = %tenant_id, error = %e, "failed to load tenant roles");
                AuthError::Store
            })?;

        let mut role_names = BTreeSet::new();
        let mut permissions = BTreeSet::new();
        for role in &roles {
            role_names.insert(role.name.clone());
            match self.tenant.tenant_role_permissions(tenant_id, role.id).await {
                Ok(perms) => permissions.extend(perms.iter().map(Permission::key)),
                Err(e) => {
                    warn!(user_id = %principal.id, tenant_id = %tenant_id, role = %role.name, error = %e, "skipping tenant role permissions");
                }
            }
        }

        let mut claims = AuthClaims::base(principal);
        claims.scope = tenant_scope(tenant_id, &role_names, &permissions);
        claims.roles = role_names.into_iter().collect();
        claims.permissions = permissions.into_iter().collect();
        Ok(claims)
    }
}
