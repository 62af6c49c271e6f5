pub mod credential_repo;
pub mod error;
pub mod impersonation_repo;
pub mod mfa_repo;
pub mod principal_repo;
pub mod refresh_token_repo;
pub mod role_repo;
pub mod tenant_settings_repo;

pub use credential_repo::CredentialRepo;
pub use impersonation_repo::ImpersonationRepo;
pub use mfa_repo::MfaRepo;
pub use principal_repo::PrincipalRepo;
pub use refresh_token_repo::RefreshTokenRepo;
pub use role_repo::RoleRepo;
pub use tenant_settings_repo::TenantSettingsRepo;
