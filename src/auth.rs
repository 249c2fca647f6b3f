//! Credential primitives: salted password hashes and opaque random tokens

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{AclError, Result};

fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| AclError::Storage(format!("random source unavailable: {e}")))?;
    Ok(bytes)
}

/// Generate a cryptographically secure token (32 bytes, base64url encoded)
pub fn generate_token() -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes::<32>()?))
}

/// Hash token with SHA-256 for storage
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Generate random salt (16 bytes, hex encoded)
pub fn generate_salt() -> Result<String> {
    Ok(hex::encode(random_bytes::<16>()?))
}

/// Hash password with salt
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Encode a credential record as `salt|hash`
pub fn encode_credential(password: &str) -> Result<String> {
    let salt = generate_salt()?;
    let hash = hash_password(&salt, password);
    Ok(format!("{salt}|{hash}"))
}

/// Check a password against a stored `salt|hash` record
pub fn verify_credential(record: &str, password: &str) -> Result<bool> {
    let (salt, stored) = record
        .split_once('|')
        .ok_or_else(|| AclError::Storage("corrupted credentials".into()))?;
    Ok(constant_time_eq(stored.as_bytes(), hash_password(salt, password).as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
