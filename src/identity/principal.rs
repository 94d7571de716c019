use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Activation state derived from the stored tri-state `active` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveState { Disabled, Pending, Active }

impl From<i32> for ActiveState {
    fn from(v: i32) -> Self {
        match v {
            v if v < 0 => ActiveState::Disabled,
            0 => ActiveState::Pending,
            _ => ActiveState::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub project_id: Uuid,
    pub client_platform_id: Uuid,
    pub client_type_id: Uuid,
    pub role_id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub photo_url: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub active: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub id: Uuid,
    pub project_id: Uuid,
    pub client_platform_id: Uuid,
    pub client_type_id: Uuid,
    pub role_id: Uuid,
    #[serde(default)]
    pub title: String,
    #[serde(skip_serializing, default)]
    pub secret_key: String,
    pub active: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reference to the principal a session is bound to. Exactly one kind per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PrincipalId {
    User(Uuid),
    Integration(Uuid),
}

impl PrincipalId {
    pub fn uuid(&self) -> Uuid {
        match self { PrincipalId::User(id) | PrincipalId::Integration(id) => *id }
    }
    pub fn user_id(&self) -> Option<Uuid> {
        match self { PrincipalId::User(id) => Some(*id), PrincipalId::Integration(_) => None }
    }
    pub fn integration_id(&self) -> Option<Uuid> {
        match self { PrincipalId::Integration(id) => Some(*id), PrincipalId::User(_) => None }
    }
}

/// A resolved principal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User(User),
    Integration(Integration),
}

impl Principal {
    pub fn active_state(&self) -> ActiveState {
        match self {
            Principal::User(u) => u.active.into(),
            Principal::Integration(i) => i.active.into(),
        }
    }
    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            Principal::User(u) => u.expires_at,
            Principal::Integration(i) => i.expires_at,
        }
    }
}

/// Column a login identifier is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind { Email, Phone, Login }

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("email regex"));
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9]{7,15}$").expect("phone regex"));

impl IdentifierKind {
    pub fn classify(identifier: &str) -> Self {
        if EMAIL_RE.is_match(identifier) {
            IdentifierKind::Email
        } else if PHONE_RE.is_match(identifier) {
            IdentifierKind::Phone
        } else {
            IdentifierKind::Login
        }
    }

    pub fn matches(&self, user: &User, identifier: &str) -> bool {
        let field = match self {
            IdentifierKind::Email => user.email.as_deref(),
            IdentifierKind::Phone => user.phone.as_deref(),
            IdentifierKind::Login => user.login.as_deref(),
        };
        field == Some(identifier)
    }

    pub fn column(&self) -> &'static str {
        match self {
            IdentifierKind::Email => "email",
            IdentifierKind::Phone => "phone",
            IdentifierKind::Login => "login",
        }
    }
}
