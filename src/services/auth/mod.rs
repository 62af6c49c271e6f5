pub mod claims;
pub mod credentials;
pub mod error;
pub mod factory;
pub mod impersonation;
pub mod jwt;
pub mod login;
pub mod mfa;
pub mod password;
pub mod principal;
pub mod refresh_token_issuer;
pub mod token_service;

pub use error::{AuthError, DenialReason};
pub use factory::{AuthServices, AuthSettings, AuthStores, build_auth_services};
pub use login::{LoginOutcome, LoginRequest, LoginService};
pub use token_service::{IssuedTokens, TokenService};
