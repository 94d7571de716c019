//! Session lifecycle: login, integration hand-off, refresh, logout and pruning.
//!
//! A session row is the unit of revocation. Refresh re-signs tokens against the
//! same row without extending its expiry; logout deletes the row, after which both
//! tokens still verify cryptographically but fail session lookup.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::security::HashParams;
use crate::storage::{Client, ClientPlatform, ClientType, CredentialStore, NewSession, Role, Session, StoreError};

use super::principal::{IdentifierKind, Integration, Principal, PrincipalId, User};
use super::provider::{
    ensure_standard_strategy, ensure_usable, reject_unknown_user, validate_secret_shape, verify_integration_secret,
    verify_user_password,
};
use super::request_context::RequestContext;
use super::token::{ClaimMap, TokenCodec};

pub const DEFAULT_SESSION_IP: &str = "0.0.0.0";

/// Token pair handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub refresh_in_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// Login, email or phone.
    pub identifier: String,
    pub password: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub client_platform: ClientPlatform,
    pub client_type: ClientType,
    pub client: Client,
    pub role: Role,
    /// Non-expired sessions that existed before this login.
    pub sessions: Vec<Session>,
    pub session: Session,
    pub token: Token,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationLoginRequest {
    pub integration_id: Uuid,
    pub secret_key: String,
    /// Expiry requested by the caller; clamped to the integration's own expiry.
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrationLoginResponse {
    pub integration: Integration,
    pub client_platform: ClientPlatform,
    pub client_type: ClientType,
    pub client: Client,
    pub role: Role,
    pub session: Session,
    pub token: Token,
}

/// Claims embedded in both tokens of a pair: the session id plus its denormalized fields.
pub fn session_claims(session: &Session) -> ClaimMap {
    let mut m = ClaimMap::new();
    m.insert("id".into(), Value::from(session.id.to_string()));
    m.insert("project_id".into(), Value::from(session.project_id.to_string()));
    m.insert("client_platform_id".into(), Value::from(session.client_platform_id.to_string()));
    m.insert("client_type_id".into(), Value::from(session.client_type_id.to_string()));
    match session.principal {
        PrincipalId::User(id) => m.insert("user_id".into(), Value::from(id.to_string())),
        PrincipalId::Integration(id) => m.insert("integration_id".into(), Value::from(id.to_string())),
    };
    m.insert("role_id".into(), Value::from(session.role_id.to_string()));
    m.insert("ip".into(), Value::from(session.ip.clone()));
    m.insert("data".into(), Value::from(session.data.clone()));
    m
}

pub(crate) fn issue_token(tokens: &TokenCodec, session: &Session) -> AuthResult<Token> {
    let (access_token, refresh_token) = tokens.issue_pair(&session_claims(session))?;
    Ok(Token {
        access_token,
        refresh_token,
        created_at: session.created_at,
        updated_at: session.updated_at,
        expires_at: session.expires_at,
        refresh_in_seconds: tokens.access_ttl().num_seconds(),
    })
}

pub(crate) async fn load_principal(
    store: &dyn CredentialStore,
    ctx: &RequestContext,
    id: PrincipalId,
) -> AuthResult<Principal> {
    let res = match id {
        PrincipalId::User(uid) => ctx.run(store.get_user(uid)).await.map(Principal::User),
        PrincipalId::Integration(iid) => ctx.run(store.get_integration(iid)).await.map(Principal::Integration),
    };
    // Deleting a principal cascades to its sessions, so a dangling reference is a revoked session.
    res.map_err(|e| e.or_not_found(AuthError::SessionNotFound))
}

/// Verify a token and resolve its live session and principal, applying the
/// principal gate before the session row's own expiry.
pub(crate) async fn resolve_session(
    store: &dyn CredentialStore,
    tokens: &TokenCodec,
    ctx: &RequestContext,
    token: &str,
) -> AuthResult<(Session, Principal)> {
    let session_id = tokens.extract_session_id(token)?;
    let session = ctx
        .run(store.get_session(session_id))
        .await
        .map_err(|e| e.or_not_found(AuthError::SessionNotFound))?;
    let principal = load_principal(store, ctx, session.principal).await?;
    let now = Utc::now();
    ensure_usable(&principal, now)?;
    if session.is_expired_at(now) {
        debug!(target: "gatekeep::session", session_id = %session.id, "session row past expiry");
        return Err(AuthError::SessionNotFound);
    }
    Ok((session, principal))
}

struct ClientContext {
    client_platform: ClientPlatform,
    client_type: ClientType,
    client: Client,
    role: Role,
}

pub struct SessionManager {
    pub(super) store: Arc<dyn CredentialStore>,
    pub(super) tokens: TokenCodec,
    pub(super) hash_params: HashParams,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CredentialStore>, tokens: TokenCodec) -> Self {
        Self { store, tokens, hash_params: HashParams::default() }
    }

    /// Argon2 cost used for passwords this manager writes.
    pub fn with_hash_params(mut self, params: HashParams) -> Self {
        self.hash_params = params;
        self
    }

    async fn resolve_client_context(
        &self,
        ctx: &RequestContext,
        client_platform_id: Uuid,
        client_type_id: Uuid,
        role_id: Uuid,
    ) -> AuthResult<ClientContext> {
        let missing = |what: &str| AuthError::InvalidArgument(format!("{what} not found"));
        let client_type = ctx
            .run(self.store.get_client_type(client_type_id))
            .await
            .map_err(|e| e.or_not_found(missing("client type")))?;
        let client_platform = ctx
            .run(self.store.get_client_platform(client_platform_id))
            .await
            .map_err(|e| e.or_not_found(missing("client platform")))?;
        let client = ctx
            .run(self.store.get_client(client_platform_id, client_type_id))
            .await
            .map_err(|e| e.or_not_found(missing("client")))?;
        ensure_standard_strategy(&client)?;
        let role = ctx.run(self.store.get_role(role_id)).await.map_err(|e| e.or_not_found(missing("role")))?;
        Ok(ClientContext { client_platform, client_type, client, role })
    }

    async fn open_session(&self, ctx: &RequestContext, new: NewSession) -> AuthResult<Session> {
        let id = ctx.run(self.store.create_session(new)).await?;
        Ok(ctx.run(self.store.get_session(id)).await?)
    }

    /// Remove the principal's sessions whose expiry has passed.
    pub async fn delete_expired(&self, ctx: &RequestContext, principal: PrincipalId) -> AuthResult<u64> {
        let removed = ctx.run(self.store.delete_expired_sessions(principal, Utc::now())).await?;
        debug!(target: "gatekeep::session", principal = %principal.uuid(), removed, "pruned expired sessions");
        Ok(removed)
    }

    pub async fn login(&self, ctx: &RequestContext, req: &LoginRequest) -> AuthResult<LoginResponse> {
        let identifier = req.identifier.trim();
        if identifier.is_empty() {
            return Err(AuthError::InvalidArgument("identifier is required".into()));
        }
        validate_secret_shape(&req.password)?;

        let kind = IdentifierKind::classify(identifier);
        let user = match ctx.run(self.store.find_user_by_identifier(kind, identifier)).await {
            Ok(u) => u,
            Err(e) => {
                let err = match e {
                    StoreError::NotFound(_) => reject_unknown_user(&req.password).await,
                    other => other.into(),
                };
                warn!(target: "gatekeep::session", request_id = ?ctx.request_id, lookup = kind.column(), code = err.code_str(), "login rejected");
                return Err(err);
            }
        };
        let res = self.login_user(ctx, req, user.clone()).await;
        if let Err(e) = &res {
            warn!(target: "gatekeep::session", request_id = ?ctx.request_id, user_id = %user.id, code = e.code_str(), "login rejected: {e}");
        }
        res
    }

    async fn login_user(&self, ctx: &RequestContext, req: &LoginRequest, user: User) -> AuthResult<LoginResponse> {
        verify_user_password(&user, &req.password).await?;
        let now = Utc::now();
        ensure_usable(&Principal::User(user.clone()), now)?;

        let cc = self.resolve_client_context(ctx, user.client_platform_id, user.client_type_id, user.role_id).await?;

        let principal_id = PrincipalId::User(user.id);
        self.delete_expired(ctx, principal_id).await?;
        let sessions = ctx.run(self.store.list_sessions(principal_id)).await?;

        let expires_at = std::cmp::min(now + self.tokens.refresh_ttl(), user.expires_at);
        let session = self
            .open_session(
                ctx,
                NewSession {
                    project_id: user.project_id,
                    client_platform_id: user.client_platform_id,
                    client_type_id: user.client_type_id,
                    principal: principal_id,
                    role_id: user.role_id,
                    ip: req.ip.clone().or_else(|| ctx.ip.clone()).unwrap_or_else(|| DEFAULT_SESSION_IP.into()),
                    data: req.data.clone().unwrap_or_default(),
                    expires_at,
                },
            )
            .await?;
        let token = issue_token(&self.tokens, &session)?;
        info!(target: "gatekeep::session", user_id = %user.id, session_id = %session.id, prior_sessions = sessions.len(), "login");

        Ok(LoginResponse {
            user,
            client_platform: cc.client_platform,
            client_type: cc.client_type,
            client: cc.client,
            role: cc.role,
            sessions,
            session,
            token,
        })
    }

    /// Machine login with a pre-shared integration key (AddSessionToIntegration).
    pub async fn add_session_to_integration(
        &self,
        ctx: &RequestContext,
        req: &IntegrationLoginRequest,
    ) -> AuthResult<IntegrationLoginResponse> {
        let res = self.login_integration(ctx, req).await;
        match &res {
            Ok(r) => info!(target: "gatekeep::session", integration_id = %r.integration.id, session_id = %r.session.id, "integration session opened"),
            Err(e) => warn!(target: "gatekeep::session", integration_id = %req.integration_id, code = e.code_str(), "integration login rejected: {e}"),
        }
        res
    }

    async fn login_integration(&self, ctx: &RequestContext, req: &IntegrationLoginRequest) -> AuthResult<IntegrationLoginResponse> {
        validate_secret_shape(&req.secret_key)?;
        let integration = ctx
            .run(self.store.get_integration(req.integration_id))
            .await
            .map_err(|e| e.or_not_found(AuthError::InvalidCredential))?;
        verify_integration_secret(&integration, &req.secret_key)?;

        let now = Utc::now();
        ensure_usable(&Principal::Integration(integration.clone()), now)?;
        if req.expires_at < now {
            return Err(AuthError::IntegrationExpired);
        }

        let cc = self
            .resolve_client_context(ctx, integration.client_platform_id, integration.client_type_id, integration.role_id)
            .await?;

        let principal_id = PrincipalId::Integration(integration.id);
        self.delete_expired(ctx, principal_id).await?;

        let session = self
            .open_session(
                ctx,
                NewSession {
                    project_id: integration.project_id,
                    client_platform_id: integration.client_platform_id,
                    client_type_id: integration.client_type_id,
                    principal: principal_id,
                    role_id: integration.role_id,
                    ip: req.ip.clone().or_else(|| ctx.ip.clone()).unwrap_or_else(|| DEFAULT_SESSION_IP.into()),
                    data: req.data.clone().unwrap_or_default(),
                    expires_at: std::cmp::min(req.expires_at, integration.expires_at),
                },
            )
            .await?;
        let token = issue_token(&self.tokens, &session)?;

        Ok(IntegrationLoginResponse {
            integration,
            client_platform: cc.client_platform,
            client_type: cc.client_type,
            client: cc.client,
            role: cc.role,
            session,
            token,
        })
    }

    /// Re-issue a token pair for the session referenced by a refresh token.
    pub async fn refresh(&self, ctx: &RequestContext, refresh_token: &str) -> AuthResult<Token> {
        let (session, _principal) = resolve_session(&*self.store, &self.tokens, ctx, refresh_token)
            .await
            .map_err(|e| {
                warn!(target: "gatekeep::session", request_id = ?ctx.request_id, code = e.code_str(), "refresh rejected");
                e
            })?;
        let token = issue_token(&self.tokens, &session)?;
        debug!(target: "gatekeep::session", session_id = %session.id, "refreshed");
        Ok(token)
    }

    /// Delete the session behind an access token. Deleting an absent row is not an error.
    pub async fn logout(&self, ctx: &RequestContext, access_token: &str) -> AuthResult<()> {
        let session_id = self.tokens.extract_session_id(access_token)?;
        let removed = ctx.run(self.store.delete_session(session_id)).await?;
        info!(target: "gatekeep::session", session_id = %session_id, removed, "logout");
        Ok(())
    }

    async fn integration_session(&self, ctx: &RequestContext, integration_id: Uuid, session_id: Uuid) -> AuthResult<Session> {
        let session = ctx
            .run(self.store.get_session(session_id))
            .await
            .map_err(|e| e.or_not_found(AuthError::SessionNotFound))?;
        if session.principal != PrincipalId::Integration(integration_id) {
            return Err(AuthError::SessionNotFound);
        }
        Ok(session)
    }

    /// Re-issue tokens for an existing integration session (GetIntegrationToken).
    pub async fn get_integration_token(&self, ctx: &RequestContext, integration_id: Uuid, session_id: Uuid) -> AuthResult<Token> {
        let session = self.integration_session(ctx, integration_id, session_id).await?;
        let principal = load_principal(&*self.store, ctx, session.principal).await?;
        let now = Utc::now();
        ensure_usable(&principal, now)?;
        if session.is_expired_at(now) {
            return Err(AuthError::SessionNotFound);
        }
        issue_token(&self.tokens, &session)
    }

    pub async fn integration_sessions(&self, ctx: &RequestContext, integration_id: Uuid) -> AuthResult<Vec<Session>> {
        Ok(ctx.run(self.store.list_sessions(PrincipalId::Integration(integration_id))).await?)
    }

    pub async fn delete_integration_session(&self, ctx: &RequestContext, integration_id: Uuid, session_id: Uuid) -> AuthResult<()> {
        let session = self.integration_session(ctx, integration_id, session_id).await?;
        let removed = ctx.run(self.store.delete_session(session.id)).await?;
        if removed == 0 {
            return Err(AuthError::SessionNotFound);
        }
        info!(target: "gatekeep::session", integration_id = %integration_id, session_id = %session_id, "integration session removed");
        Ok(())
    }
}
