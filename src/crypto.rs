//! Secret hashing and random code generation.

use rand::Rng;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Characters used in human-facing codes (no 0/O/1/I to avoid misreads).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const VERIFICATION_CODE_LEN: usize = 12;

/// Hash a secret for database lookups (login codes, unsubscribe tokens).
/// SHA-256 with an application prefix, lowercase hex.
pub fn hash_secret(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"coursehub-v1:");
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Six-digit numeric sign-in code, zero padded.
pub fn generate_login_code() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000u32))
}

/// Public certificate verification code.
pub fn generate_verification_code() -> String {
    let mut rng = OsRng;
    (0..VERIFICATION_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Opaque 256-bit token, hex encoded (newsletter unsubscribe links).
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill(&mut bytes);
    hex::encode(bytes)
}
