use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body for `POST /mfa/challenge/verify`.
#[derive(Clone, Deserialize)]
pub struct VerifyChallengeBody {
    pub session_id: String,
    /// TOTP code or recovery code.
    pub code: String,
    pub tenant_id: Option<Uuid>,
}

impl std::fmt::Debug for VerifyChallengeBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifyChallengeBody")
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Deserialize)]
pub struct ConfirmTotpBody {
    pub code: String,
}

impl std::fmt::Debug for ConfirmTotpBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConfirmTotpBody { .. }")
    }
}

#[derive(Clone, Serialize)]
pub struct TotpEnrollmentResponse {
    pub secret: String,
    pub otpauth_url: String,
}

#[derive(Clone, Serialize)]
pub struct RecoveryCodesResponse {
    pub recovery_codes: Vec<String>,
}
