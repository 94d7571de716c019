//! Shared fixture for the integration tests: one project with one platform,
//! client type and role, backed by the in-memory credential store.
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use uuid::Uuid;

use gatekeep::identity::{
    AccessDecisionEngine, Integration, PermissionResolver, SessionManager, TokenCodec, TokenSettings, User,
};
use gatekeep::security::{self, HashParams};
use gatekeep::storage::{
    Client, ClientPlatform, ClientStore, ClientType, CredentialStore, IntegrationStore, LoginStrategy, MemoryStore,
    Permission, PermissionScope, PermissionStore, Role, RoleStore, ScopeStore, UserStore,
};

pub const SECRET: &str = "integration-test-secret";

// Cheap Argon2 cost so seeding stays fast; verification reads the embedded parameters.
const LIGHT: HashParams = HashParams { m_cost: 1024, t_cost: 1, p_cost: 1, output_len: 32 };

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub tokens: TokenCodec,
    pub sessions: SessionManager,
    pub access: AccessDecisionEngine,
    pub resolver: PermissionResolver,
    pub project_id: Uuid,
    pub platform_id: Uuid,
    pub client_type_id: Uuid,
    pub role_id: Uuid,
}

impl Fixture {
    pub async fn new() -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn CredentialStore> = store.clone();
        let tokens = TokenCodec::new(&TokenSettings {
            secret: SECRET.into(),
            access_ttl: Duration::days(1),
            refresh_ttl: Duration::days(30),
        });

        let project_id = Uuid::new_v4();
        let platform_id = store
            .create_client_platform(ClientPlatform {
                id: Uuid::new_v4(),
                project_id,
                name: "platformA".into(),
                subdomain: "a".into(),
            })
            .await?;
        let client_type_id = store
            .create_client_type(ClientType {
                id: Uuid::new_v4(),
                project_id,
                name: "staff".into(),
                self_register: false,
                self_recover: true,
            })
            .await?;
        store
            .add_client(Client {
                project_id,
                client_platform_id: platform_id,
                client_type_id,
                login_strategy: LoginStrategy::Standard,
            })
            .await?;
        let role_id = store
            .create_role(Role {
                id: Uuid::new_v4(),
                project_id,
                client_platform_id: platform_id,
                client_type_id,
                name: "viewer".into(),
            })
            .await?;

        Ok(Self {
            sessions: SessionManager::new(dyn_store.clone(), tokens.clone()).with_hash_params(LIGHT),
            access: AccessDecisionEngine::new(dyn_store.clone(), tokens.clone()),
            resolver: PermissionResolver::new(dyn_store),
            store,
            tokens,
            project_id,
            platform_id,
            client_type_id,
            role_id,
        })
    }

    pub fn user_template(&self, login: &str, active: i32, expires_in: Duration) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            project_id: self.project_id,
            client_platform_id: self.platform_id,
            client_type_id: self.client_type_id,
            role_id: self.role_id,
            name: login.to_string(),
            photo_url: String::new(),
            phone: None,
            email: Some(format!("{login}@example.com")),
            login: Some(login.to_string()),
            password_hash: String::new(),
            active,
            expires_at: now + expires_in,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn seed_user(&self, login: &str, password: &str, active: i32, expires_in: Duration) -> Result<User> {
        let mut user = self.user_template(login, active, expires_in);
        user.password_hash = security::hash_password_with(password, &LIGHT)?;
        self.store.create_user(user.clone()).await?;
        Ok(user)
    }

    pub async fn seed_integration(&self, secret: &str, active: i32, expires_in: Duration) -> Result<Integration> {
        let now = Utc::now();
        let integration = Integration {
            id: Uuid::new_v4(),
            project_id: self.project_id,
            client_platform_id: self.platform_id,
            client_type_id: self.client_type_id,
            role_id: self.role_id,
            title: "ci-runner".into(),
            secret_key: secret.to_string(),
            active,
            expires_at: now + expires_in,
            created_at: now,
            updated_at: now,
        };
        self.store.create_integration(integration.clone()).await?;
        Ok(integration)
    }

    pub async fn set_login_strategy(&self, login_strategy: LoginStrategy) -> Result<()> {
        self.store
            .add_client(Client {
                project_id: self.project_id,
                client_platform_id: self.platform_id,
                client_type_id: self.client_type_id,
                login_strategy,
            })
            .await?;
        Ok(())
    }

    pub async fn permission(&self, parent_id: Option<Uuid>, name: &str) -> Result<Uuid> {
        let id = self
            .store
            .create_permission(Permission { id: Uuid::new_v4(), client_platform_id: self.platform_id, parent_id, name: name.into() })
            .await?;
        Ok(id)
    }

    /// Create a permission scoped to (platform, path, method) and attach it to the fixture role.
    pub async fn grant(&self, path: &str, method: &str) -> Result<Uuid> {
        let pid = self.permission(None, &format!("{method} {path}")).await?;
        self.store.add_permission_scope(PermissionScope::new(pid, self.platform_id, path, method)).await?;
        self.store.add_role_permissions(self.role_id, &[pid]).await?;
        Ok(pid)
    }

    pub async fn requests(&self, path: &str, method: &str) -> Result<i64> {
        Ok(self.store.get_scope(self.platform_id, path, method).await?.requests)
    }
}
