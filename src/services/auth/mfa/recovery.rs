//! Single-use recovery codes.
//!
//! Codes are shown once as `XXXX-XXXX-XXXX`; only SHA-256 hashes of the normalized
//! form are stored, so a presented code is looked up by hash.
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

pub const RECOVERY_CODE_COUNT: usize = 10;
const RECOVERY_CODE_LEN: usize = 12;
const RECOVERY_CODE_GROUP_SIZE: usize = 4;
const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly generated batch: plaintext for the user, hashes for the store.
#[derive(Clone)]
pub struct RecoveryCodeBatch {
    pub codes: Vec<String>,
    pub hashes: Vec<Vec<u8>>,
}

impl std::fmt::Debug for RecoveryCodeBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCodeBatch")
            .field("count", &self.codes.len())
            .finish()
    }
}

impl RecoveryCodeBatch {
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut codes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        let mut hashes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        for _ in 0..RECOVERY_CODE_COUNT {
            let normalized = generate_normalized(rng);
            hashes.push(hash_normalized(&normalized));
            codes.push(format_recovery_code(&normalized));
        }
        Self { codes, hashes }
    }
}

/// Strip separators and uppercase. `None` if the result is not a well-formed code.
pub fn normalize_recovery_code(input: &str) -> Option<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != RECOVERY_CODE_LEN {
        return None;
    }
    if !normalized
        .bytes()
        .all(|ch| RECOVERY_CODE_ALPHABET.contains(&ch))
    {
        return None;
    }
    Some(normalized)
}

/// Hash of a user-supplied code, `None` if it is malformed.
pub fn hash_recovery_code(input: &str) -> Option<Vec<u8>> {
    normalize_recovery_code(input).map(|n| hash_normalized(&n))
}

fn hash_normalized(normalized: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.finalize().to_vec()
}

fn format_recovery_code(normalized: &str) -> String {
    normalized
        .as_bytes()
        .chunks(RECOVERY_CODE_GROUP_SIZE)
        .map(|chunk| chunk.iter().map(|&b| b as char).collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

fn generate_normalized<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut raw = [0u8; RECOVERY_CODE_LEN];
    rng.fill_bytes(&mut raw);
    raw.iter()
        .map(|&byte| RECOVERY_CODE_ALPHABET[usize::from(byte) % RECOVERY_CODE_ALPHABET.len()] as char)
        .collect()
}
