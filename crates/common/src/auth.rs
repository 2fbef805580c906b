//! API key generation, hashing, and input validation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Stable prefix of every issued key, so a leaked credential is recognizable
/// in logs and secret scanners.
pub const API_KEY_PREFIX: &str = "ci_";

/// 30 random bytes = 240 bits of entropy = 40 base64 characters.
const API_KEY_RANDOM_BYTES: usize = 30;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email regex")
});

/// Generate a new API key: `ci_` followed by 40 URL-safe base64 characters.
///
/// The plaintext is returned exactly once; callers persist only the hash.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{API_KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Hex-encoded SHA-256 of an API key, the only form ever stored.
pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

pub fn validate_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}
