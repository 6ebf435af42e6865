use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of random bytes behind verification and reset tokens.
const SECURE_TOKEN_BYTES: usize = 32;

/// SHA-256 of a token, hex encoded.
///
/// Raw refresh, verification and reset tokens never reach storage; only
/// this digest does.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Random URL-safe token for email verification and password reset links.
pub fn generate_secure_token() -> String {
    let mut bytes = [0u8; SECURE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
