//! Postgres credential store over a bounded `sqlx` pool.
//!
//! Callers queue for a connection up to the pool's acquire timeout; their own
//! deadline (`RequestContext::run`) may cut that wait shorter. Scope accounting is
//! one `INSERT .. ON CONFLICT .. DO UPDATE` statement and the access decision is
//! one join, so neither has a read-modify-write window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::identity::{check_parent_link, IdentifierKind, Integration, PrincipalId, User};

use super::model::*;
use super::{
    ClientStore, IntegrationStore, PermissionStore, RoleStore, ScopeStore, SessionStore, StoreError, StoreResult,
    UserStore,
};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS client_platform (
        id UUID PRIMARY KEY,
        project_id UUID NOT NULL,
        name TEXT NOT NULL,
        subdomain TEXT NOT NULL DEFAULT ''
    )"#,
    r#"CREATE TABLE IF NOT EXISTS client_type (
        id UUID PRIMARY KEY,
        project_id UUID NOT NULL,
        name TEXT NOT NULL,
        self_register BOOLEAN NOT NULL DEFAULT FALSE,
        self_recover BOOLEAN NOT NULL DEFAULT FALSE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS client (
        project_id UUID NOT NULL,
        client_platform_id UUID NOT NULL REFERENCES client_platform(id) ON DELETE CASCADE,
        client_type_id UUID NOT NULL REFERENCES client_type(id) ON DELETE CASCADE,
        login_strategy TEXT NOT NULL DEFAULT 'STANDARD',
        PRIMARY KEY (client_platform_id, client_type_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS role (
        id UUID PRIMARY KEY,
        project_id UUID NOT NULL,
        client_platform_id UUID NOT NULL,
        client_type_id UUID NOT NULL,
        name TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS "user" (
        id UUID PRIMARY KEY,
        project_id UUID NOT NULL,
        client_platform_id UUID NOT NULL,
        client_type_id UUID NOT NULL,
        role_id UUID NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        photo_url TEXT NOT NULL DEFAULT '',
        phone TEXT UNIQUE,
        email TEXT UNIQUE,
        login TEXT UNIQUE,
        password TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 0,
        expires_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS integration (
        id UUID PRIMARY KEY,
        project_id UUID NOT NULL,
        client_platform_id UUID NOT NULL,
        client_type_id UUID NOT NULL,
        role_id UUID NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        secret_key TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 0,
        expires_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS session (
        id UUID PRIMARY KEY,
        project_id UUID NOT NULL,
        client_platform_id UUID NOT NULL,
        client_type_id UUID NOT NULL,
        user_id UUID REFERENCES "user"(id) ON DELETE CASCADE,
        integration_id UUID REFERENCES integration(id) ON DELETE CASCADE,
        role_id UUID NOT NULL,
        ip TEXT NOT NULL DEFAULT '',
        data TEXT NOT NULL DEFAULT '',
        expires_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CHECK ((user_id IS NULL) <> (integration_id IS NULL))
    )"#,
    r#"CREATE TABLE IF NOT EXISTS permission (
        id UUID PRIMARY KEY,
        client_platform_id UUID NOT NULL,
        parent_id UUID REFERENCES permission(id),
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
        CHECK (parent_id IS NULL OR parent_id <> id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS role_permission (
        role_id UUID NOT NULL REFERENCES role(id) ON DELETE CASCADE,
        permission_id UUID NOT NULL REFERENCES permission(id) ON DELETE CASCADE,
        PRIMARY KEY (role_id, permission_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS scope (
        client_platform_id UUID NOT NULL,
        path TEXT NOT NULL,
        method TEXT NOT NULL,
        requests BIGINT NOT NULL DEFAULT 0,
        PRIMARY KEY (client_platform_id, path, method)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS permission_scope (
        permission_id UUID NOT NULL REFERENCES permission(id) ON DELETE CASCADE,
        client_platform_id UUID NOT NULL,
        path TEXT NOT NULL,
        method TEXT NOT NULL,
        PRIMARY KEY (permission_id, client_platform_id, path, method)
    )"#,
    "CREATE INDEX IF NOT EXISTS session_user_idx ON session (user_id)",
    "CREATE INDEX IF NOT EXISTS session_integration_idx ON session (integration_id)",
    "CREATE INDEX IF NOT EXISTS permission_scope_lookup_idx ON permission_scope (client_platform_id, path, method)",
];

const USER_COLS: &str = "id, project_id, client_platform_id, client_type_id, role_id, name, photo_url, phone, email, login, \
                         password, active, expires_at, created_at, updated_at";
const INTEGRATION_COLS: &str = "id, project_id, client_platform_id, client_type_id, role_id, title, secret_key, active, \
                                expires_at, created_at, updated_at";
const SESSION_COLS: &str = "id, project_id, client_platform_id, client_type_id, user_id, integration_id, role_id, ip, data, \
                            expires_at, created_at, updated_at";
const PERMISSION_COLS: &str = "p.id, p.client_platform_id, p.parent_id, p.name";

/// Translate a driver error. `what` names the row kind for `NotFound`.
fn db_err(what: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| match e {
        sqlx::Error::RowNotFound => StoreError::not_found(what),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => StoreError::Conflict(format!("{what}: {}", db.message())),
            Some("23503") => StoreError::NotFound(format!("{what} reference")),
            Some("23514") | Some("22P02") => StoreError::InvalidArgument(format!("{what}: {}", db.message())),
            _ => StoreError::Unavailable(db.message().to_string()),
        },
        sqlx::Error::PoolTimedOut => StoreError::Unavailable("connection pool exhausted".into()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        client_platform_id: row.try_get("client_platform_id")?,
        client_type_id: row.try_get("client_type_id")?,
        role_id: row.try_get("role_id")?,
        name: row.try_get("name")?,
        photo_url: row.try_get("photo_url")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        login: row.try_get("login")?,
        password_hash: row.try_get("password")?,
        active: row.try_get("active")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn integration_from_row(row: &PgRow) -> Result<Integration, sqlx::Error> {
    Ok(Integration {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        client_platform_id: row.try_get("client_platform_id")?,
        client_type_id: row.try_get("client_type_id")?,
        role_id: row.try_get("role_id")?,
        title: row.try_get("title")?,
        secret_key: row.try_get("secret_key")?,
        active: row.try_get("active")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<Session> {
    let err = db_err("session");
    let id: Uuid = row.try_get("id").map_err(&err)?;
    let user_id: Option<Uuid> = row.try_get("user_id").map_err(&err)?;
    let integration_id: Option<Uuid> = row.try_get("integration_id").map_err(&err)?;
    let principal = match (user_id, integration_id) {
        (Some(u), None) => PrincipalId::User(u),
        (None, Some(i)) => PrincipalId::Integration(i),
        _ => return Err(StoreError::Unavailable(format!("session {id} is bound to no single principal"))),
    };
    Ok(Session {
        id,
        project_id: row.try_get("project_id").map_err(&err)?,
        client_platform_id: row.try_get("client_platform_id").map_err(&err)?,
        client_type_id: row.try_get("client_type_id").map_err(&err)?,
        principal,
        role_id: row.try_get("role_id").map_err(&err)?,
        ip: row.try_get("ip").map_err(&err)?,
        data: row.try_get("data").map_err(&err)?,
        expires_at: row.try_get("expires_at").map_err(&err)?,
        created_at: row.try_get("created_at").map_err(&err)?,
        updated_at: row.try_get("updated_at").map_err(&err)?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, sqlx::Error> {
    Ok(Permission {
        id: row.try_get("id")?,
        client_platform_id: row.try_get("client_platform_id")?,
        parent_id: row.try_get("parent_id")?,
        name: row.try_get("name")?,
    })
}

fn scope_from_row(row: &PgRow) -> Result<Scope, sqlx::Error> {
    Ok(Scope {
        client_platform_id: row.try_get("client_platform_id")?,
        path: row.try_get("path")?,
        method: row.try_get("method")?,
        requests: row.try_get("requests")?,
    })
}

fn principal_column(principal: PrincipalId) -> &'static str {
    match principal {
        PrincipalId::User(_) => "user_id",
        PrincipalId::Integration(_) => "integration_id",
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn from_pool(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(config: &Config) -> StoreResult<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::InvalidArgument("DATABASE_URL is not set".into()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(config.db_acquire_timeout)
            .connect(url)
            .await
            .map_err(db_err("connection"))?;
        info!(target: "gatekeep::storage", max_connections = config.db_max_connections, "postgres pool ready");
        Ok(Self { pool })
    }

    pub async fn install_schema(&self) -> StoreResult<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await.map_err(db_err("schema"))?;
        }
        Ok(())
    }

    /// Lock the platform's permission rows and validate a parent link against them.
    async fn check_parent_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
        client_platform_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> StoreResult<()> {
        if parent_id.is_none() {
            return Ok(());
        }
        let rows = sqlx::query(&format!(
            "SELECT {PERMISSION_COLS} FROM permission p WHERE p.client_platform_id = $1 ORDER BY p.created_at FOR UPDATE"
        ))
        .bind(client_platform_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_err("permission"))?;
        let mut existing = rows.iter().map(permission_from_row).collect::<Result<Vec<_>, _>>().map_err(db_err("permission"))?;
        if let Some(parent) = parent_id {
            // The parent may live on another platform; fetch it so the check can report that.
            if !existing.iter().any(|p| p.id == parent) {
                let other = sqlx::query(&format!("SELECT {PERMISSION_COLS} FROM permission p WHERE p.id = $1"))
                    .bind(parent)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(db_err("permission"))?;
                if let Some(row) = other {
                    existing.push(permission_from_row(&row).map_err(db_err("permission"))?);
                }
            }
        }
        check_parent_link(id, client_platform_id, parent_id, &existing).map_err(|e| StoreError::InvalidArgument(e.to_string()))
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_user_by_identifier(&self, kind: IdentifierKind, identifier: &str) -> StoreResult<User> {
        let row = sqlx::query(&format!("SELECT {USER_COLS} FROM \"user\" WHERE {} = $1", kind.column()))
            .bind(identifier)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("user"))?;
        user_from_row(&row).map_err(db_err("user"))
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        let row = sqlx::query(&format!("SELECT {USER_COLS} FROM \"user\" WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("user"))?;
        user_from_row(&row).map_err(db_err("user"))
    }

    async fn create_user(&self, user: User) -> StoreResult<Uuid> {
        sqlx::query(&format!(
            "INSERT INTO \"user\" ({USER_COLS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(user.id)
        .bind(user.project_id)
        .bind(user.client_platform_id)
        .bind(user.client_type_id)
        .bind(user.role_id)
        .bind(&user.name)
        .bind(&user.photo_url)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(&user.login)
        .bind(&user.password_hash)
        .bind(user.active)
        .bind(user.expires_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("user"))?;
        Ok(user.id)
    }

    async fn update_user(&self, user: User) -> StoreResult<u64> {
        let res = sqlx::query(
            r#"UPDATE "user" SET project_id = $2, client_platform_id = $3, client_type_id = $4, role_id = $5,
                   name = $6, photo_url = $7, phone = $8, email = $9, login = $10, password = $11,
                   active = $12, expires_at = $13, updated_at = now()
               WHERE id = $1"#,
        )
        .bind(user.id)
        .bind(user.project_id)
        .bind(user.client_platform_id)
        .bind(user.client_type_id)
        .bind(user.role_id)
        .bind(&user.name)
        .bind(&user.photo_url)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(&user.login)
        .bind(&user.password_hash)
        .bind(user.active)
        .bind(user.expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("user"))?;
        Ok(res.rows_affected())
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM \"user\" WHERE id = $1").bind(id).execute(&self.pool).await.map_err(db_err("user"))?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl IntegrationStore for PgStore {
    async fn get_integration(&self, id: Uuid) -> StoreResult<Integration> {
        let row = sqlx::query(&format!("SELECT {INTEGRATION_COLS} FROM integration WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("integration"))?;
        integration_from_row(&row).map_err(db_err("integration"))
    }

    async fn create_integration(&self, i: Integration) -> StoreResult<Uuid> {
        sqlx::query(&format!("INSERT INTO integration ({INTEGRATION_COLS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"))
            .bind(i.id)
            .bind(i.project_id)
            .bind(i.client_platform_id)
            .bind(i.client_type_id)
            .bind(i.role_id)
            .bind(&i.title)
            .bind(&i.secret_key)
            .bind(i.active)
            .bind(i.expires_at)
            .bind(i.created_at)
            .bind(i.updated_at)
            .execute(&self.pool)
            .await
            .map_err(db_err("integration"))?;
        Ok(i.id)
    }

    async fn update_integration(&self, i: Integration) -> StoreResult<u64> {
        let res = sqlx::query(
            r#"UPDATE integration SET project_id = $2, client_platform_id = $3, client_type_id = $4, role_id = $5,
                   title = $6, secret_key = $7, active = $8, expires_at = $9, updated_at = now()
               WHERE id = $1"#,
        )
        .bind(i.id)
        .bind(i.project_id)
        .bind(i.client_platform_id)
        .bind(i.client_type_id)
        .bind(i.role_id)
        .bind(&i.title)
        .bind(&i.secret_key)
        .bind(i.active)
        .bind(i.expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("integration"))?;
        Ok(res.rows_affected())
    }

    async fn delete_integration(&self, id: Uuid) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM integration WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("integration"))?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, s: NewSession) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO session (id, project_id, client_platform_id, client_type_id, user_id, integration_id,
                                    role_id, ip, data, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(id)
        .bind(s.project_id)
        .bind(s.client_platform_id)
        .bind(s.client_type_id)
        .bind(s.principal.user_id())
        .bind(s.principal.integration_id())
        .bind(s.role_id)
        .bind(&s.ip)
        .bind(&s.data)
        .bind(s.expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("session"))?;
        Ok(id)
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Session> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLS} FROM session WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("session"))?;
        session_from_row(&row)
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM session WHERE id = $1").bind(id).execute(&self.pool).await.map_err(db_err("session"))?;
        Ok(res.rows_affected())
    }

    async fn delete_expired_sessions(&self, principal: PrincipalId, now: DateTime<Utc>) -> StoreResult<u64> {
        let res = sqlx::query(&format!("DELETE FROM session WHERE {} = $1 AND expires_at < $2", principal_column(principal)))
            .bind(principal.uuid())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err("session"))?;
        Ok(res.rows_affected())
    }

    async fn list_sessions(&self, principal: PrincipalId) -> StoreResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLS} FROM session WHERE {} = $1 ORDER BY created_at, id",
            principal_column(principal)
        ))
        .bind(principal.uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("session"))?;
        rows.iter().map(session_from_row).collect()
    }
}

#[async_trait]
impl RoleStore for PgStore {
    async fn get_role(&self, id: Uuid) -> StoreResult<Role> {
        let row = sqlx::query("SELECT id, project_id, client_platform_id, client_type_id, name FROM role WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("role"))?;
        let err = db_err("role");
        Ok(Role {
            id: row.try_get("id").map_err(&err)?,
            project_id: row.try_get("project_id").map_err(&err)?,
            client_platform_id: row.try_get("client_platform_id").map_err(&err)?,
            client_type_id: row.try_get("client_type_id").map_err(&err)?,
            name: row.try_get("name").map_err(&err)?,
        })
    }

    async fn create_role(&self, role: Role) -> StoreResult<Uuid> {
        sqlx::query("INSERT INTO role (id, project_id, client_platform_id, client_type_id, name) VALUES ($1, $2, $3, $4, $5)")
            .bind(role.id)
            .bind(role.project_id)
            .bind(role.client_platform_id)
            .bind(role.client_type_id)
            .bind(&role.name)
            .execute(&self.pool)
            .await
            .map_err(db_err("role"))?;
        Ok(role.id)
    }

    async fn add_role_permissions(&self, role_id: Uuid, permission_ids: &[Uuid]) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err("role permission"))?;
        let mut added = 0;
        for &pid in permission_ids {
            let res = sqlx::query("INSERT INTO role_permission (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(role_id)
                .bind(pid)
                .execute(&mut *tx)
                .await
                .map_err(db_err("role permission"))?;
            added += res.rows_affected();
        }
        tx.commit().await.map_err(db_err("role permission"))?;
        Ok(added)
    }

    async fn remove_role_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM role_permission WHERE role_id = $1 AND permission_id = $2")
            .bind(role_id)
            .bind(permission_id)
            .execute(&self.pool)
            .await
            .map_err(db_err("role permission"))?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl ClientStore for PgStore {
    async fn get_client_platform(&self, id: Uuid) -> StoreResult<ClientPlatform> {
        let row = sqlx::query("SELECT id, project_id, name, subdomain FROM client_platform WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("client platform"))?;
        let err = db_err("client platform");
        Ok(ClientPlatform {
            id: row.try_get("id").map_err(&err)?,
            project_id: row.try_get("project_id").map_err(&err)?,
            name: row.try_get("name").map_err(&err)?,
            subdomain: row.try_get("subdomain").map_err(&err)?,
        })
    }

    async fn get_client_type(&self, id: Uuid) -> StoreResult<ClientType> {
        let row = sqlx::query("SELECT id, project_id, name, self_register, self_recover FROM client_type WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("client type"))?;
        let err = db_err("client type");
        Ok(ClientType {
            id: row.try_get("id").map_err(&err)?,
            project_id: row.try_get("project_id").map_err(&err)?,
            name: row.try_get("name").map_err(&err)?,
            self_register: row.try_get("self_register").map_err(&err)?,
            self_recover: row.try_get("self_recover").map_err(&err)?,
        })
    }

    async fn get_client(&self, client_platform_id: Uuid, client_type_id: Uuid) -> StoreResult<Client> {
        let row = sqlx::query(
            "SELECT project_id, login_strategy FROM client WHERE client_platform_id = $1 AND client_type_id = $2",
        )
        .bind(client_platform_id)
        .bind(client_type_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("client"))?;
        let err = db_err("client");
        let strategy: String = row.try_get("login_strategy").map_err(&err)?;
        let login_strategy = LoginStrategy::parse(&strategy).ok_or_else(|| {
            warn!(target: "gatekeep::storage", %client_platform_id, %client_type_id, strategy = %strategy, "unknown login strategy");
            StoreError::InvalidArgument(format!("unknown login strategy {strategy}"))
        })?;
        Ok(Client { project_id: row.try_get("project_id").map_err(&err)?, client_platform_id, client_type_id, login_strategy })
    }

    async fn create_client_platform(&self, p: ClientPlatform) -> StoreResult<Uuid> {
        sqlx::query("INSERT INTO client_platform (id, project_id, name, subdomain) VALUES ($1, $2, $3, $4)")
            .bind(p.id)
            .bind(p.project_id)
            .bind(&p.name)
            .bind(&p.subdomain)
            .execute(&self.pool)
            .await
            .map_err(db_err("client platform"))?;
        Ok(p.id)
    }

    async fn create_client_type(&self, t: ClientType) -> StoreResult<Uuid> {
        sqlx::query("INSERT INTO client_type (id, project_id, name, self_register, self_recover) VALUES ($1, $2, $3, $4, $5)")
            .bind(t.id)
            .bind(t.project_id)
            .bind(&t.name)
            .bind(t.self_register)
            .bind(t.self_recover)
            .execute(&self.pool)
            .await
            .map_err(db_err("client type"))?;
        Ok(t.id)
    }

    async fn add_client(&self, c: Client) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO client (project_id, client_platform_id, client_type_id, login_strategy) VALUES ($1, $2, $3, $4)
               ON CONFLICT (client_platform_id, client_type_id) DO UPDATE SET login_strategy = EXCLUDED.login_strategy"#,
        )
        .bind(c.project_id)
        .bind(c.client_platform_id)
        .bind(c.client_type_id)
        .bind(c.login_strategy.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err("client"))?;
        Ok(())
    }
}

#[async_trait]
impl ScopeStore for PgStore {
    async fn upsert_scope_and_increment(&self, client_platform_id: Uuid, path: &str, method: &str) -> StoreResult<Scope> {
        let row = sqlx::query(
            r#"INSERT INTO scope (client_platform_id, path, method, requests) VALUES ($1, $2, $3, 1)
               ON CONFLICT (client_platform_id, path, method) DO UPDATE SET requests = scope.requests + 1
               RETURNING client_platform_id, path, method, requests"#,
        )
        .bind(client_platform_id)
        .bind(path)
        .bind(normalize_method(method))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("scope"))?;
        scope_from_row(&row).map_err(db_err("scope"))
    }

    async fn get_scope(&self, client_platform_id: Uuid, path: &str, method: &str) -> StoreResult<Scope> {
        let row = sqlx::query(
            "SELECT client_platform_id, path, method, requests FROM scope WHERE client_platform_id = $1 AND path = $2 AND method = $3",
        )
        .bind(client_platform_id)
        .bind(path)
        .bind(normalize_method(method))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("scope"))?;
        scope_from_row(&row).map_err(db_err("scope"))
    }
}

#[async_trait]
impl PermissionStore for PgStore {
    async fn create_permission(&self, p: Permission) -> StoreResult<Uuid> {
        let mut tx = self.pool.begin().await.map_err(db_err("permission"))?;
        Self::check_parent_in_tx(&mut tx, p.id, p.client_platform_id, p.parent_id).await?;
        sqlx::query("INSERT INTO permission (id, client_platform_id, parent_id, name) VALUES ($1, $2, $3, $4)")
            .bind(p.id)
            .bind(p.client_platform_id)
            .bind(p.parent_id)
            .bind(&p.name)
            .execute(&mut *tx)
            .await
            .map_err(db_err("permission"))?;
        tx.commit().await.map_err(db_err("permission"))?;
        Ok(p.id)
    }

    async fn set_permission_parent(&self, id: Uuid, parent_id: Option<Uuid>) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err("permission"))?;
        let row = sqlx::query("SELECT client_platform_id FROM permission WHERE id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("permission"))?;
        let platform: Uuid = row.try_get("client_platform_id").map_err(db_err("permission"))?;
        Self::check_parent_in_tx(&mut tx, id, platform, parent_id).await?;
        let res = sqlx::query("UPDATE permission SET parent_id = $2 WHERE id = $1")
            .bind(id)
            .bind(parent_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err("permission"))?;
        tx.commit().await.map_err(db_err("permission"))?;
        Ok(res.rows_affected())
    }

    async fn get_permission(&self, id: Uuid) -> StoreResult<Permission> {
        let row = sqlx::query(&format!("SELECT {PERMISSION_COLS} FROM permission p WHERE p.id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("permission"))?;
        permission_from_row(&row).map_err(db_err("permission"))
    }

    async fn list_permissions_by_role(&self, role_id: Uuid) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query(&format!(
            "SELECT {PERMISSION_COLS} FROM permission p JOIN role_permission rp ON rp.permission_id = p.id \
             WHERE rp.role_id = $1 ORDER BY p.created_at"
        ))
        .bind(role_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("permission"))?;
        rows.iter().map(permission_from_row).collect::<Result<_, _>>().map_err(db_err("permission"))
    }

    async fn list_permissions_by_platform(&self, client_platform_id: Uuid) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query(&format!(
            "SELECT {PERMISSION_COLS} FROM permission p WHERE p.client_platform_id = $1 ORDER BY p.created_at"
        ))
        .bind(client_platform_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("permission"))?;
        rows.iter().map(permission_from_row).collect::<Result<_, _>>().map_err(db_err("permission"))
    }

    async fn add_permission_scope(&self, grant: PermissionScope) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO permission_scope (permission_id, client_platform_id, path, method) VALUES ($1, $2, $3, $4) \
             ON CONFLICT DO NOTHING",
        )
        .bind(grant.permission_id)
        .bind(grant.client_platform_id)
        .bind(&grant.path)
        .bind(normalize_method(&grant.method))
        .execute(&self.pool)
        .await
        .map_err(db_err("permission"))?;
        Ok(())
    }

    async fn remove_permission_scope(&self, grant: &PermissionScope) -> StoreResult<u64> {
        let res = sqlx::query(
            "DELETE FROM permission_scope WHERE permission_id = $1 AND client_platform_id = $2 AND path = $3 AND method = $4",
        )
        .bind(grant.permission_id)
        .bind(grant.client_platform_id)
        .bind(&grant.path)
        .bind(normalize_method(&grant.method))
        .execute(&self.pool)
        .await
        .map_err(db_err("permission scope"))?;
        Ok(res.rows_affected())
    }

    async fn role_has_permission_scope(&self, role_id: Uuid, client_platform_id: Uuid, path: &str, method: &str) -> StoreResult<bool> {
        let row = sqlx::query(
            r#"SELECT EXISTS (
                   SELECT 1 FROM role_permission rp
                   JOIN permission_scope ps ON ps.permission_id = rp.permission_id
                   WHERE rp.role_id = $1 AND ps.client_platform_id = $2 AND ps.path = $3 AND ps.method = $4
               ) AS allowed"#,
        )
        .bind(role_id)
        .bind(client_platform_id)
        .bind(path)
        .bind(normalize_method(method))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("permission scope"))?;
        row.try_get("allowed").map_err(db_err("permission scope"))
    }
}
