//! Signed session tokens (HS256 JWT).
//!
//! Payload is the caller's claim map plus `iat`/`exp` stamped by the codec. The
//! access and refresh token of a pair carry identical claims and differ only in
//! expiry; revocation happens by deleting the session row, never by token state.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

pub type ClaimMap = serde_json::Map<String, Value>;

pub const CLAIM_SESSION_ID: &str = "id";
pub const CLAIM_ISSUED_AT: &str = "iat";
pub const CLAIM_EXPIRES_AT: &str = "exp";

#[derive(Clone)]
pub struct TokenSettings {
    pub secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSettings")
            .field("secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    pub fn new(settings: &TokenSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding: DecodingKey::from_secret(settings.secret.as_bytes()),
            validation,
            access_ttl: settings.access_ttl,
            refresh_ttl: settings.refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration { self.access_ttl }
    pub fn refresh_ttl(&self) -> Duration { self.refresh_ttl }

    pub fn issue(&self, claims: &ClaimMap, ttl: Duration) -> AuthResult<String> {
        let now = Utc::now();
        let mut payload = claims.clone();
        payload.insert(CLAIM_ISSUED_AT.into(), Value::from(now.timestamp()));
        payload.insert(CLAIM_EXPIRES_AT.into(), Value::from((now + ttl).timestamp()));
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &payload, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))
    }

    /// Issue an (access, refresh) pair over the same claims.
    pub fn issue_pair(&self, claims: &ClaimMap) -> AuthResult<(String, String)> {
        Ok((self.issue(claims, self.access_ttl)?, self.issue(claims, self.refresh_ttl)?))
    }

    pub fn verify(&self, token: &str) -> AuthResult<ClaimMap> {
        jsonwebtoken::decode::<ClaimMap>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::InvalidToken,
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::TokenParse(e.to_string()),
            })
    }

    pub fn extract_session_id(&self, token: &str) -> AuthResult<Uuid> {
        let claims = self.verify(token)?;
        session_id_from_claims(&claims)
    }
}

pub fn session_id_from_claims(claims: &ClaimMap) -> AuthResult<Uuid> {
    let raw = claims.get(CLAIM_SESSION_ID).and_then(Value::as_str).ok_or(AuthError::MalformedClaims)?;
    Uuid::parse_str(raw).map_err(|_| AuthError::MalformedClaims)
}
