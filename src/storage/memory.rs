//! In-process credential store. One `RwLock` guards every table so each trait
//! call is a single critical section; there is no read-modify-write window
//! across calls.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::identity::{check_parent_link, IdentifierKind, Integration, PrincipalId, User};

use super::model::*;
use super::{
    ClientStore, IntegrationStore, PermissionStore, RoleStore, ScopeStore, SessionStore, StoreError, StoreResult,
    UserStore,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    integrations: HashMap<Uuid, Integration>,
    // (insertion sequence, row)
    sessions: HashMap<Uuid, (u64, Session)>,
    roles: HashMap<Uuid, Role>,
    role_permissions: HashSet<(Uuid, Uuid)>,
    client_platforms: HashMap<Uuid, ClientPlatform>,
    client_types: HashMap<Uuid, ClientType>,
    clients: HashMap<(Uuid, Uuid), Client>,
    scopes: HashMap<(Uuid, String, String), i64>,
    permissions: HashMap<Uuid, (u64, Permission)>,
    permission_scopes: HashSet<PermissionScope>,
}

impl Tables {
    fn platform_permissions(&self, client_platform_id: Uuid) -> Vec<Permission> {
        let mut rows: Vec<&(u64, Permission)> =
            self.permissions.values().filter(|(_, p)| p.client_platform_id == client_platform_id).collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, p)| p.clone()).collect()
    }

    fn drop_sessions_of(&mut self, principal: PrincipalId) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, (_, s)| s.principal != principal);
        before - self.sessions.len()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    seq: AtomicU64,
    scope_writes_offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn next_seq(&self) -> u64 { self.seq.fetch_add(1, Ordering::Relaxed) }

    /// Make scope accounting report `Unavailable`, leaving every other table reachable.
    pub fn set_scope_writes_offline(&self, offline: bool) { self.scope_writes_offline.store(offline, Ordering::Relaxed); }
}

fn hierarchy_err(e: crate::identity::HierarchyError) -> StoreError { StoreError::InvalidArgument(e.to_string()) }

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_identifier(&self, kind: IdentifierKind, identifier: &str) -> StoreResult<User> {
        let t = self.tables.read();
        t.users.values().find(|u| kind.matches(u, identifier)).cloned().ok_or_else(|| StoreError::not_found("user"))
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        self.tables.read().users.get(&id).cloned().ok_or_else(|| StoreError::not_found("user"))
    }

    async fn create_user(&self, user: User) -> StoreResult<Uuid> {
        let mut t = self.tables.write();
        if t.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user {} already exists", user.id)));
        }
        let taken = |a: &Option<String>, b: &Option<String>| a.is_some() && a == b;
        if t.users.values().any(|u| taken(&u.login, &user.login) || taken(&u.email, &user.email) || taken(&u.phone, &user.phone)) {
            return Err(StoreError::Conflict("login, email or phone already in use".into()));
        }
        let id = user.id;
        t.users.insert(id, user);
        Ok(id)
    }

    async fn update_user(&self, mut user: User) -> StoreResult<u64> {
        let mut t = self.tables.write();
        match t.users.get_mut(&user.id) {
            Some(slot) => {
                user.updated_at = Utc::now();
                *slot = user;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<u64> {
        let mut t = self.tables.write();
        if t.users.remove(&id).is_none() {
            return Ok(0);
        }
        t.drop_sessions_of(PrincipalId::User(id));
        Ok(1)
    }
}

#[async_trait]
impl IntegrationStore for MemoryStore {
    async fn get_integration(&self, id: Uuid) -> StoreResult<Integration> {
        self.tables.read().integrations.get(&id).cloned().ok_or_else(|| StoreError::not_found("integration"))
    }

    async fn create_integration(&self, integration: Integration) -> StoreResult<Uuid> {
        let mut t = self.tables.write();
        if t.integrations.contains_key(&integration.id) {
            return Err(StoreError::Conflict(format!("integration {} already exists", integration.id)));
        }
        let id = integration.id;
        t.integrations.insert(id, integration);
        Ok(id)
    }

    async fn update_integration(&self, mut integration: Integration) -> StoreResult<u64> {
        let mut t = self.tables.write();
        match t.integrations.get_mut(&integration.id) {
            Some(slot) => {
                integration.updated_at = Utc::now();
                *slot = integration;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_integration(&self, id: Uuid) -> StoreResult<u64> {
        let mut t = self.tables.write();
        if t.integrations.remove(&id).is_none() {
            return Ok(0);
        }
        t.drop_sessions_of(PrincipalId::Integration(id));
        Ok(1)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, new: NewSession) -> StoreResult<Uuid> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            project_id: new.project_id,
            client_platform_id: new.client_platform_id,
            client_type_id: new.client_type_id,
            principal: new.principal,
            role_id: new.role_id,
            ip: new.ip,
            data: new.data,
            expires_at: new.expires_at,
            created_at: now,
            updated_at: now,
        };
        let id = session.id;
        let seq = self.next_seq();
        self.tables.write().sessions.insert(id, (seq, session));
        Ok(id)
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Session> {
        self.tables.read().sessions.get(&id).map(|(_, s)| s.clone()).ok_or_else(|| StoreError::not_found("session"))
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<u64> {
        Ok(self.tables.write().sessions.remove(&id).map_or(0, |_| 1))
    }

    async fn delete_expired_sessions(&self, principal: PrincipalId, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut t = self.tables.write();
        let before = t.sessions.len();
        t.sessions.retain(|_, (_, s)| !(s.principal == principal && s.is_expired_at(now)));
        Ok((before - t.sessions.len()) as u64)
    }

    async fn list_sessions(&self, principal: PrincipalId) -> StoreResult<Vec<Session>> {
        let t = self.tables.read();
        let mut rows: Vec<&(u64, Session)> = t.sessions.values().filter(|(_, s)| s.principal == principal).collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, s)| s.clone()).collect())
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn get_role(&self, id: Uuid) -> StoreResult<Role> {
        self.tables.read().roles.get(&id).cloned().ok_or_else(|| StoreError::not_found("role"))
    }

    async fn create_role(&self, role: Role) -> StoreResult<Uuid> {
        let mut t = self.tables.write();
        if t.roles.contains_key(&role.id) {
            return Err(StoreError::Conflict(format!("role {} already exists", role.id)));
        }
        let id = role.id;
        t.roles.insert(id, role);
        Ok(id)
    }

    async fn add_role_permissions(&self, role_id: Uuid, permission_ids: &[Uuid]) -> StoreResult<u64> {
        let mut t = self.tables.write();
        if !t.roles.contains_key(&role_id) {
            return Err(StoreError::not_found("role"));
        }
        if let Some(missing) = permission_ids.iter().find(|p| !t.permissions.contains_key(p)) {
            return Err(StoreError::NotFound(format!("permission {missing}")));
        }
        let added = permission_ids.iter().filter(|p| t.role_permissions.insert((role_id, **p))).count();
        Ok(added as u64)
    }

    async fn remove_role_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<u64> {
        Ok(self.tables.write().role_permissions.remove(&(role_id, permission_id)) as u64)
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn get_client_platform(&self, id: Uuid) -> StoreResult<ClientPlatform> {
        self.tables.read().client_platforms.get(&id).cloned().ok_or_else(|| StoreError::not_found("client platform"))
    }

    async fn get_client_type(&self, id: Uuid) -> StoreResult<ClientType> {
        self.tables.read().client_types.get(&id).cloned().ok_or_else(|| StoreError::not_found("client type"))
    }

    async fn get_client(&self, client_platform_id: Uuid, client_type_id: Uuid) -> StoreResult<Client> {
        self.tables
            .read()
            .clients
            .get(&(client_platform_id, client_type_id))
            .cloned()
            .ok_or_else(|| StoreError::not_found("client"))
    }

    async fn create_client_platform(&self, platform: ClientPlatform) -> StoreResult<Uuid> {
        let id = platform.id;
        self.tables.write().client_platforms.insert(id, platform);
        Ok(id)
    }

    async fn create_client_type(&self, client_type: ClientType) -> StoreResult<Uuid> {
        let id = client_type.id;
        self.tables.write().client_types.insert(id, client_type);
        Ok(id)
    }

    async fn add_client(&self, client: Client) -> StoreResult<()> {
        self.tables.write().clients.insert((client.client_platform_id, client.client_type_id), client);
        Ok(())
    }
}

#[async_trait]
impl ScopeStore for MemoryStore {
    async fn upsert_scope_and_increment(&self, client_platform_id: Uuid, path: &str, method: &str) -> StoreResult<Scope> {
        if self.scope_writes_offline.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("scope table offline".into()));
        }
        let method = normalize_method(method);
        let mut t = self.tables.write();
        let counter = t.scopes.entry((client_platform_id, path.to_string(), method.clone())).or_insert(0);
        *counter += 1;
        Ok(Scope { client_platform_id, path: path.to_string(), method, requests: *counter })
    }

    async fn get_scope(&self, client_platform_id: Uuid, path: &str, method: &str) -> StoreResult<Scope> {
        let method = normalize_method(method);
        let t = self.tables.read();
        let requests = *t
            .scopes
            .get(&(client_platform_id, path.to_string(), method.clone()))
            .ok_or_else(|| StoreError::not_found("scope"))?;
        Ok(Scope { client_platform_id, path: path.to_string(), method, requests })
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn create_permission(&self, permission: Permission) -> StoreResult<Uuid> {
        let mut t = self.tables.write();
        if t.permissions.contains_key(&permission.id) {
            return Err(StoreError::Conflict(format!("permission {} already exists", permission.id)));
        }
        let existing = t.platform_permissions(permission.client_platform_id);
        check_parent_link(permission.id, permission.client_platform_id, permission.parent_id, &existing)
            .map_err(hierarchy_err)?;
        let id = permission.id;
        let seq = self.next_seq();
        t.permissions.insert(id, (seq, permission));
        Ok(id)
    }

    async fn set_permission_parent(&self, id: Uuid, parent_id: Option<Uuid>) -> StoreResult<u64> {
        let mut t = self.tables.write();
        let platform = t.permissions.get(&id).map(|(_, p)| p.client_platform_id).ok_or_else(|| StoreError::not_found("permission"))?;
        let existing = t.platform_permissions(platform);
        check_parent_link(id, platform, parent_id, &existing).map_err(hierarchy_err)?;
        if let Some((_, p)) = t.permissions.get_mut(&id) {
            p.parent_id = parent_id;
        }
        Ok(1)
    }

    async fn get_permission(&self, id: Uuid) -> StoreResult<Permission> {
        self.tables.read().permissions.get(&id).map(|(_, p)| p.clone()).ok_or_else(|| StoreError::not_found("permission"))
    }

    async fn list_permissions_by_role(&self, role_id: Uuid) -> StoreResult<Vec<Permission>> {
        let t = self.tables.read();
        let mut rows: Vec<&(u64, Permission)> = t
            .role_permissions
            .iter()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, pid)| t.permissions.get(pid))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, p)| p.clone()).collect())
    }

    async fn list_permissions_by_platform(&self, client_platform_id: Uuid) -> StoreResult<Vec<Permission>> {
        Ok(self.tables.read().platform_permissions(client_platform_id))
    }

    async fn add_permission_scope(&self, grant: PermissionScope) -> StoreResult<()> {
        let grant = PermissionScope::new(grant.permission_id, grant.client_platform_id, &grant.path, &grant.method);
        let mut t = self.tables.write();
        if !t.permissions.contains_key(&grant.permission_id) {
            return Err(StoreError::not_found("permission"));
        }
        t.permission_scopes.insert(grant);
        Ok(())
    }

    async fn remove_permission_scope(&self, grant: &PermissionScope) -> StoreResult<u64> {
        let grant = PermissionScope::new(grant.permission_id, grant.client_platform_id, &grant.path, &grant.method);
        Ok(self.tables.write().permission_scopes.remove(&grant) as u64)
    }

    async fn role_has_permission_scope(&self, role_id: Uuid, client_platform_id: Uuid, path: &str, method: &str) -> StoreResult<bool> {
        let method = normalize_method(method);
        let t = self.tables.read();
        Ok(t.permission_scopes.iter().any(|ps| {
            ps.client_platform_id == client_platform_id
                && ps.path == path
                && ps.method == method
                && t.role_permissions.contains(&(role_id, ps.permission_id))
        }))
    }
}
