//! TOTP (RFC 6238) helpers: SHA1, 6 digits, 30 second step.
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::warn;

use crate::services::auth::error::AuthError;

pub const TOTP_DIGITS: usize = 6;
pub const TOTP_STEP_SECONDS: u64 = 30;
/// Accepted drift, in periods, on either side of the current step.
pub const TOTP_SKEW: u8 = 2;
const SECRET_BYTES: usize = 20;

/// True when `code` has the shape of a TOTP code (exactly six ASCII digits).
pub fn looks_like_totp(code: &str) -> bool {
    code.len() == TOTP_DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

/// A fresh 160-bit secret, base32 encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Secret::Raw(bytes.to_vec()).to_encoded().to_string()
}

pub fn build_totp(secret_base32: &str, issuer: &str, account: &str) -> Result<TOTP, AuthError> {
    let bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| {
            warn!(error = ?e, "stored TOTP secret is not valid base32");
            AuthError::Store
        })?;

    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP_SECONDS,
        bytes,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| {
        warn!(error = ?e, "TOTP init error");
        AuthError::Store
    })
}

/// Check `code` against `secret_base32` at `now`, within ±`TOTP_SKEW` periods.
pub fn verify_code(secret_base32: &str, code: &str, now: DateTime<Utc>) -> Result<bool, AuthError> {
    if !looks_like_totp(code) {
        return Ok(false);
    }
    // Issuer and account only matter for the otpauth URL.
    let totp = build_totp(secret_base32, "verify", "user")?;
    let Ok(time) = u64::try_from(now.timestamp()) else {
        return Ok(false);
    };
    Ok(totp.check(code, time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn code_at(secret: &str, unix: u64) -> String {
        build_totp(secret, "verify", "user")
            .unwrap()
            .generate(unix)
    }

    #[test]
    fn shape_check() {
        assert!(looks_like_totp("012345"));
        assert!(!looks_like_totp("01234"));
        assert!(!looks_like_totp("01234a"));
        assert!(!looks_like_totp("ABCD-EFGH-JKLM"));
    }

    #[test]
    fn accepts_two_periods_of_drift_and_no_more() {
        let secret = generate_secret();
        let now = Utc.timestamp_opt(1_700_000_010, 0).unwrap();
        let t = now.timestamp() as u64;

        assert!(verify_code(&secret, &code_at(&secret, t), now).unwrap());
        assert!(verify_code(&secret, &code_at(&secret, t - 60), now).unwrap());
        assert!(verify_code(&secret, &code_at(&secret, t + 60), now).unwrap());

        let stale = code_at(&secret, t - 120);
        if stale != code_at(&secret, t) {
            assert!(!verify_code(&secret, &stale, now).unwrap());
        }
    }

    #[test]
    fn generated_secret_is_usable() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 32);
        assert!(build_totp(&secret, "Acme", "alice").is_ok());
    }
}
