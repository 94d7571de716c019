//! Row types shared by the credential store adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::PrincipalId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub project_id: Uuid,
    pub client_platform_id: Uuid,
    pub client_type_id: Uuid,
    pub principal: PrincipalId,
    /// Snapshotted at creation; later role changes do not affect the session.
    pub role_id: Uuid,
    pub ip: String,
    pub data: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool { self.expires_at < now }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub project_id: Uuid,
    pub client_platform_id: Uuid,
    pub client_type_id: Uuid,
    pub principal: PrincipalId,
    pub role_id: Uuid,
    pub ip: String,
    pub data: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginStrategy { Standard, Otp, PasscodeByEmail, PasscodeByPhone }

impl LoginStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStrategy::Standard => "STANDARD",
            LoginStrategy::Otp => "OTP",
            LoginStrategy::PasscodeByEmail => "PASSCODE_BY_EMAIL",
            LoginStrategy::PasscodeByPhone => "PASSCODE_BY_PHONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STANDARD" => Some(LoginStrategy::Standard),
            "OTP" => Some(LoginStrategy::Otp),
            "PASSCODE_BY_EMAIL" => Some(LoginStrategy::PasscodeByEmail),
            "PASSCODE_BY_PHONE" => Some(LoginStrategy::PasscodeByPhone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPlatform {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub subdomain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientType {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub self_register: bool,
    pub self_recover: bool,
}

/// Pairing of a client platform and client type, carrying its login strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub project_id: Uuid,
    pub client_platform_id: Uuid,
    pub client_type_id: Uuid,
    pub login_strategy: LoginStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub project_id: Uuid,
    pub client_platform_id: Uuid,
    pub client_type_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    pub client_platform_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
}

/// Usage counter for a (platform, path, method) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub client_platform_id: Uuid,
    pub path: String,
    pub method: String,
    pub requests: i64,
}

/// Grant: `permission_id` authorizes the (platform, path, method) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionScope {
    pub permission_id: Uuid,
    pub client_platform_id: Uuid,
    pub path: String,
    pub method: String,
}

impl PermissionScope {
    pub fn new(permission_id: Uuid, client_platform_id: Uuid, path: &str, method: &str) -> Self {
        Self { permission_id, client_platform_id, path: path.to_string(), method: normalize_method(method) }
    }
}

/// HTTP methods are compared case-insensitively; rows store the upper-case form.
pub fn normalize_method(method: &str) -> String { method.trim().to_ascii_uppercase() }
