use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::services::auth::claims::AuthClaims;
use crate::services::auth::error::AuthError;

/// Key material for signing access and ID tokens.
#[derive(Clone)]
pub enum SigningKey {
    /// Ed25519 keys in PKCS#8 / SPKI PEM format (EdDSA).
    Ed25519 {
        private_key_pem: String,
        public_key_pem: String,
    },
    /// Shared secret (HS256).
    Hs256 { secret: String },
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        match self {
            Self::Ed25519 { .. } => f.write_str("SigningKey::Ed25519"),
            Self::Hs256 { .. } => f.write_str("SigningKey::Hs256"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Id,
}

/// Full JWT payload: registered claims plus the identity/authorization claims.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: Uuid,
    pub token_use: TokenUse,
    #[serde(flatten)]
    pub claims: AuthClaims,
}

// Errors returned by token verification + strict claim validation.
#[derive(Debug, Error)]
pub enum TokenVerifyError {
    #[error("jwt verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("empty '{0}' claim")]
    EmptyClaim(&'static str),
    #[error("unexpected token use")]
    WrongTokenUse,
}

#[derive(Clone)]
pub struct JwtIssuer {
    issuer: String,
    audience: String,
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("JwtIssuer")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl JwtIssuer {
    pub fn new(
        key: &SigningKey,
        issuer: String,
        audience: String,
        leeway_seconds: u64,
    ) -> Result<Self, AuthError> {
        let (algorithm, encoding_key, decoding_key) = match key {
            SigningKey::Ed25519 {
                private_key_pem,
                public_key_pem,
            } => {
                let encoding_key = EncodingKey::from_ed_pem(private_key_pem.as_bytes())
                    .map_err(|e| {
                        warn!(error = %e, "failed to parse JWT private key PEM (expected Ed25519 PKCS#8 PEM)");
                        AuthError::TokenGenerationFailed
                    })?;
                let decoding_key = DecodingKey::from_ed_pem(public_key_pem.as_bytes())
                    .map_err(|e| {
                        warn!(error = %e, "failed to parse JWT public key PEM (expected Ed25519 PEM)");
                        AuthError::TokenGenerationFailed
                    })?;
                (Algorithm::EdDSA, encoding_key, decoding_key)
            }
            SigningKey::Hs256 { secret } => {
                if secret.len() < 32 {
                    warn!("JWT secret shorter than 32 bytes");
                    return Err(AuthError::TokenGenerationFailed);
                }
                (
                    Algorithm::HS256,
                    EncodingKey::from_secret(secret.as_bytes()),
                    DecodingKey::from_secret(secret.as_bytes()),
                )
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_audience(&[audience.as_str()]);
        validation.validate_nbf = true;
        validation.leeway = leeway_seconds;

        Ok(Self {
            issuer,
            audience,
            algorithm,
            encoding_key,
            decoding_key,
            validation,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        let mut header = Header::new(self.algorithm);
        header.typ = Some("JWT".to_string());
        jsonwebtoken::encode(&header, claims, &self.encoding_key).map_err(|e| {
            error!(error = %e, "failed to sign JWT");
            AuthError::TokenGenerationFailed
        })
    }

    /// Signature, `exp`, `nbf`, `iss` and `aud` checks via `jsonwebtoken`.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenVerifyError> {
        let data =
            jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// `verify` plus the checks the library does not do: non-empty identity fields and
    /// the expected `token_use`.
    pub fn verify_strict(
        &self,
        token: &str,
        expected_use: TokenUse,
    ) -> Result<TokenClaims, TokenVerifyError> {
        let claims = self.verify(token)?;

        if claims.iss.trim().is_empty() {
            return Err(TokenVerifyError::EmptyClaim("iss"));
        }
        if claims.claims.sub.is_nil() {
            return Err(TokenVerifyError::EmptyClaim("sub"));
        }
        if claims.exp == 0 {
            return Err(TokenVerifyError::EmptyClaim("exp"));
        }
        if claims.token_use != expected_use {
            return Err(TokenVerifyError::WrongTokenUse);
        }

        Ok(claims)
    }
}
