//! Password hashing (Argon2id, PHC string encoding) and secure random helpers.
//!
//! Hashes embed algorithm, version, cost parameters, salt and output, so a hash
//! produced under older parameters keeps verifying after the defaults change.

use std::borrow::Cow;

use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use base64::Engine;
use password_hash::{PasswordHash, SaltString};

pub const SALT_LEN: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HashError {
    #[error("secure randomness unavailable: {0}")]
    Randomness(String),
    #[error("incorrectly hashed: {0}")]
    Malformed(String),
    #[error("invalid hash parameters: {0}")]
    Params(String),
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    /// Memory in KiB.
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
    pub output_len: usize,
}

impl Default for HashParams {
    fn default() -> Self { Self { m_cost: 64 * 1024, t_cost: 3, p_cost: 4, output_len: 32 } }
}

impl HashParams {
    fn argon2(&self) -> Result<Argon2<'static>, HashError> {
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(self.output_len))
            .map_err(|e| HashError::Params(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

pub fn random_bytes<const N: usize>() -> Result<[u8; N], HashError> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf).map_err(|e| HashError::Randomness(e.to_string()))?;
    Ok(buf)
}

/// URL-safe base64 string over `n` random bytes.
pub fn random_string(n: usize) -> Result<String, HashError> {
    let mut buf = vec![0u8; n];
    getrandom::getrandom(&mut buf).map_err(|e| HashError::Randomness(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

pub fn hash_password(password: &str) -> Result<String, HashError> {
    hash_password_with(password, &HashParams::default())
}

pub fn hash_password_with(password: &str, params: &HashParams) -> Result<String, HashError> {
    let salt_bytes = random_bytes::<SALT_LEN>()?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| HashError::Randomness(e.to_string()))?;
    let phc = params
        .argon2()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| HashError::Params(e.to_string()))?
        .to_string();
    Ok(phc)
}

/// Older hashes spell the memory cost `models=` instead of the PHC `m=`.
fn normalize_legacy_params(hash: &str) -> Cow<'_, str> {
    let mut parts = hash.splitn(5, '$');
    let head: Vec<&str> = parts.by_ref().take(4).collect();
    match head.get(3).and_then(|p| p.strip_prefix("models=")) {
        Some(rest) => {
            let tail = parts.next().map(|t| format!("${t}")).unwrap_or_default();
            Cow::Owned(format!("{}${}${}$m={rest}{tail}", head[0], head[1], head[2]))
        }
        None => Cow::Borrowed(hash),
    }
}

/// Verify `password` against an encoded hash using the parameters embedded in it.
/// A mismatch is `Ok(false)`; an unparseable hash is an error.
pub fn verify_password(hash: &str, password: &str) -> Result<bool, HashError> {
    // $argon2id$v=19$m=..,t=..,p=..$salt$hash
    if hash.split('$').count() < 6 {
        return Err(HashError::Malformed("expected 6 '$'-delimited segments".into()));
    }
    let hash = normalize_legacy_params(hash);
    let parsed = PasswordHash::new(&hash).map_err(|e| HashError::Malformed(e.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(HashError::Malformed(e.to_string())),
    }
}
