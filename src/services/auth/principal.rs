use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::repos::error::RepoResult;

/// Authorization plane marker as it appears in token claims.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalType {
    System,
    Tenant,
    Service,
}

impl PrincipalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::Tenant => "TENANT",
            Self::Service => "SERVICE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SYSTEM" => Some(Self::System),
            "TENANT" => Some(Self::Tenant),
            "SERVICE" => Some(Self::Service),
            _ => None,
        }
    }
}

/// Who a principal is, with the tenant id present only where one exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrincipalKind {
    System,
    Tenant { tenant_id: Uuid },
    Service { tenant_id: Uuid },
}

impl PrincipalKind {
    pub fn principal_type(&self) -> PrincipalType {
        match self {
            Self::System => PrincipalType::System,
            Self::Tenant { .. } => PrincipalType::Tenant,
            Self::Service { .. } => PrincipalType::Service,
        }
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        match self {
            Self::System => None,
            Self::Tenant { tenant_id } | Self::Service { tenant_id } => Some(*tenant_id),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    /// Rebuild the kind from its stored `(type, tenant_id)` pair.
    ///
    /// Returns `None` when the pair violates "tenant id present iff not SYSTEM".
    pub fn from_parts(principal_type: PrincipalType, tenant_id: Option<Uuid>) -> Option<Self> {
        match (principal_type, tenant_id) {
            (PrincipalType::System, None) => Some(Self::System),
            (PrincipalType::Tenant, Some(tenant_id)) => Some(Self::Tenant { tenant_id }),
            (PrincipalType::Service, Some(tenant_id)) => Some(Self::Service { tenant_id }),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalStatus {
    Active,
    Inactive,
    Locked,
}

impl PrincipalStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "locked" => Some(Self::Locked),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub kind: PrincipalKind,
    pub status: PrincipalStatus,
    pub mfa_enabled: bool,
}

impl Principal {
    pub fn tenant_id(&self) -> Option<Uuid> {
        self.kind.tenant_id()
    }

    pub fn is_active(&self) -> bool {
        self.status == PrincipalStatus::Active
    }
}

/// Read access to principals.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// `tenant_id = None` searches SYSTEM principals only.
    async fn find_by_username(
        &self,
        username: &str,
        tenant_id: Option<Uuid>,
    ) -> RepoResult<Option<Principal>>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Principal>>;
}
