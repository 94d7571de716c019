//! Permission hierarchy: qualified names over a parent-linked forest and
//! write-time validation of parent links.
//!
//! Resolution is order-independent: permissions are indexed by id first and each
//! name is built by walking parent pointers with a visited set. A link that would
//! revisit a node is ignored, so a corrupted cycle degrades to "no parent" instead
//! of looping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::AuthResult;
use crate::storage::{CredentialStore, Permission};

use super::request_context::RequestContext;

pub const NAME_SEPARATOR: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPermission {
    #[serde(flatten)]
    pub permission: Permission,
    /// Ancestor names joined root-to-leaf with `/`.
    pub qualified_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HierarchyError {
    #[error("cannot use the same id for 'id' and 'parent_id'")]
    SelfParent,
    #[error("parent permission {0} does not exist")]
    UnknownParent(Uuid),
    #[error("parent permission {0} belongs to another client platform")]
    CrossPlatform(Uuid),
    #[error("parent link {parent} -> {id} would create a cycle")]
    Cycle { id: Uuid, parent: Uuid },
}

/// Resolve qualified names for every permission in `perms`, preserving input order.
pub fn resolve_names(perms: &[Permission]) -> Vec<ResolvedPermission> {
    let index: HashMap<Uuid, &Permission> = perms.iter().map(|p| (p.id, p)).collect();
    let mut cache: HashMap<Uuid, String> = HashMap::with_capacity(perms.len());
    perms
        .iter()
        .map(|p| {
            let qualified_name = qualified_name(p, &index, &mut cache);
            ResolvedPermission { permission: p.clone(), qualified_name }
        })
        .collect()
}

fn qualified_name(leaf: &Permission, index: &HashMap<Uuid, &Permission>, cache: &mut HashMap<Uuid, String>) -> String {
    if let Some(done) = cache.get(&leaf.id) {
        return done.clone();
    }
    let mut segments: Vec<&str> = vec![leaf.name.as_str()];
    let mut visited: HashSet<Uuid> = HashSet::from([leaf.id]);
    let mut cursor = leaf.parent_id;
    while let Some(pid) = cursor {
        // Missing parent (not in this listing) or a revisited node ends the walk.
        let Some(parent) = index.get(&pid) else { break };
        if !visited.insert(pid) {
            break;
        }
        segments.push(parent.name.as_str());
        cursor = parent.parent_id;
    }
    segments.reverse();
    let name = segments.join(NAME_SEPARATOR);
    cache.insert(leaf.id, name.clone());
    name
}

/// Validate that `id` may point at `parent_id` given the platform's existing permissions.
/// `existing` may or may not contain `id` itself; its current parent link is ignored.
pub fn check_parent_link(
    id: Uuid,
    client_platform_id: Uuid,
    parent_id: Option<Uuid>,
    existing: &[Permission],
) -> Result<(), HierarchyError> {
    let Some(parent) = parent_id else { return Ok(()) };
    if parent == id {
        return Err(HierarchyError::SelfParent);
    }
    let index: HashMap<Uuid, &Permission> = existing.iter().map(|p| (p.id, p)).collect();
    let parent_row = index.get(&parent).ok_or(HierarchyError::UnknownParent(parent))?;
    if parent_row.client_platform_id != client_platform_id {
        return Err(HierarchyError::CrossPlatform(parent));
    }
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut cursor = Some(parent);
    while let Some(cur) = cursor {
        if cur == id {
            return Err(HierarchyError::Cycle { id, parent });
        }
        if !visited.insert(cur) {
            // Pre-existing cycle above us that does not involve `id`.
            break;
        }
        cursor = index.get(&cur).and_then(|p| p.parent_id);
    }
    Ok(())
}

/// Store-backed listing of permissions with qualified names.
pub struct PermissionResolver {
    store: Arc<dyn CredentialStore>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self { Self { store } }

    pub async fn for_role(&self, ctx: &RequestContext, role_id: Uuid) -> AuthResult<Vec<ResolvedPermission>> {
        let perms = ctx.run(self.store.list_permissions_by_role(role_id)).await?;
        Ok(resolve_names(&perms))
    }

    pub async fn for_platform(&self, ctx: &RequestContext, client_platform_id: Uuid) -> AuthResult<Vec<ResolvedPermission>> {
        let perms = ctx.run(self.store.list_permissions_by_platform(client_platform_id)).await?;
        Ok(resolve_names(&perms))
    }
}
