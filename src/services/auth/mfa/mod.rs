pub mod challenge;
pub mod enrollment;
pub mod recovery;
pub mod totp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::repos::error::RepoResult;

pub use challenge::{ChallengeFailure, MfaChallenge, MfaChallengeManager, MfaFactor, VerifiedChallenge};
pub use enrollment::{MfaEnrollmentService, MfaEnrollmentStore, TotpEnrollment};

/// Confirmed second factors of a principal.
#[async_trait]
pub trait MfaFactorStore: Send + Sync {
    /// Base32 secret of the confirmed TOTP factor.
    async fn totp_secret(&self, user_id: Uuid) -> RepoResult<Option<String>>;

    /// Mark the unused recovery code with `code_hash` as used. `false` if there was
    /// none; a code can be consumed only once.
    async fn consume_recovery_code(
        &self,
        user_id: Uuid,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> RepoResult<bool>;
}
