//!
//! gatekeep credential store
//! -------------------------
//! The authentication core talks to persistence only through the narrow traits
//! below, one per sub-resource. `CredentialStore` bundles them so the session
//! manager and access decision engine can hold a single `Arc<dyn CredentialStore>`.
//!
//! Adapters:
//! - `MemoryStore`: `parking_lot`-guarded tables, used by tests and dev mode.
//! - `PgStore` (feature `postgres`): pooled Postgres via `sqlx`.
//!
//! Every mutation in this interface is a single atomic step at the adapter level.
//! Callers apply deadlines through `RequestContext::run`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::identity::{IdentifierKind, Integration, PrincipalId, User};

pub mod model;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryStore;
pub use model::{
    normalize_method, Client, ClientPlatform, ClientType, LoginStrategy, NewSession, Permission, PermissionScope, Role,
    Scope, Session,
};
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("operation timed out")]
    Timeout,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    pub fn not_found(what: &str) -> Self { StoreError::NotFound(what.to_string()) }

    /// Map `NotFound` to the caller's domain-specific error, everything else via `From`.
    pub fn or_not_found(self, kind: crate::error::AuthError) -> crate::error::AuthError {
        match self {
            StoreError::NotFound(_) => kind,
            other => other.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_identifier(&self, kind: IdentifierKind, identifier: &str) -> StoreResult<User>;
    async fn get_user(&self, id: Uuid) -> StoreResult<User>;
    async fn create_user(&self, user: User) -> StoreResult<Uuid>;
    async fn update_user(&self, user: User) -> StoreResult<u64>;
    /// Removes the user and every session bound to it.
    async fn delete_user(&self, id: Uuid) -> StoreResult<u64>;
}

#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn get_integration(&self, id: Uuid) -> StoreResult<Integration>;
    async fn create_integration(&self, integration: Integration) -> StoreResult<Uuid>;
    async fn update_integration(&self, integration: Integration) -> StoreResult<u64>;
    /// Removes the integration and every session bound to it.
    async fn delete_integration(&self, id: Uuid) -> StoreResult<u64>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: NewSession) -> StoreResult<Uuid>;
    async fn get_session(&self, id: Uuid) -> StoreResult<Session>;
    async fn delete_session(&self, id: Uuid) -> StoreResult<u64>;
    async fn delete_expired_sessions(&self, principal: PrincipalId, now: DateTime<Utc>) -> StoreResult<u64>;
    /// Sessions bound to the principal, oldest first.
    async fn list_sessions(&self, principal: PrincipalId) -> StoreResult<Vec<Session>>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get_role(&self, id: Uuid) -> StoreResult<Role>;
    async fn create_role(&self, role: Role) -> StoreResult<Uuid>;
    /// Attaches all permissions or none.
    async fn add_role_permissions(&self, role_id: Uuid, permission_ids: &[Uuid]) -> StoreResult<u64>;
    async fn remove_role_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<u64>;
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get_client_platform(&self, id: Uuid) -> StoreResult<ClientPlatform>;
    async fn get_client_type(&self, id: Uuid) -> StoreResult<ClientType>;
    async fn get_client(&self, client_platform_id: Uuid, client_type_id: Uuid) -> StoreResult<Client>;
    async fn create_client_platform(&self, platform: ClientPlatform) -> StoreResult<Uuid>;
    async fn create_client_type(&self, client_type: ClientType) -> StoreResult<Uuid>;
    async fn add_client(&self, client: Client) -> StoreResult<()>;
}

#[async_trait]
pub trait ScopeStore: Send + Sync {
    /// Insert-or-increment `requests` by one as a single atomic step.
    async fn upsert_scope_and_increment(&self, client_platform_id: Uuid, path: &str, method: &str) -> StoreResult<Scope>;
    async fn get_scope(&self, client_platform_id: Uuid, path: &str, method: &str) -> StoreResult<Scope>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Rejects a parent link equal to the permission's own id or one that closes a cycle.
    async fn create_permission(&self, permission: Permission) -> StoreResult<Uuid>;
    async fn set_permission_parent(&self, id: Uuid, parent_id: Option<Uuid>) -> StoreResult<u64>;
    async fn get_permission(&self, id: Uuid) -> StoreResult<Permission>;
    async fn list_permissions_by_role(&self, role_id: Uuid) -> StoreResult<Vec<Permission>>;
    async fn list_permissions_by_platform(&self, client_platform_id: Uuid) -> StoreResult<Vec<Permission>>;
    async fn add_permission_scope(&self, grant: PermissionScope) -> StoreResult<()>;
    async fn remove_permission_scope(&self, grant: &PermissionScope) -> StoreResult<u64>;
    /// True iff some permission attached to the role grants (platform, path, method).
    async fn role_has_permission_scope(&self, role_id: Uuid, client_platform_id: Uuid, path: &str, method: &str)
        -> StoreResult<bool>;
}

pub trait CredentialStore:
    UserStore + IntegrationStore + SessionStore + RoleStore + ClientStore + ScopeStore + PermissionStore
{
}

impl<T> CredentialStore for T where
    T: UserStore + IntegrationStore + SessionStore + RoleStore + ClientStore + ScopeStore + PermissionStore
{
}
