pub mod auth;
pub mod impersonation;
pub mod mfa;
