use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Generate a 256-bit random one-time token, hex encoded for transport.
///
/// The plaintext is mailed to the user exactly once; only its digest is
/// ever persisted.
pub fn generate_one_time_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 hex digest: the at-rest representation of every one-time token
/// and of the active refresh token.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
