//! Account credentials: provisioning a user with a hashed password, and the
//! password reset hand-off. A reset token is a short-lived signed token whose
//! only claim is the user id; delivering it (mail, SMS) is the caller's job.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::security;

use super::principal::{IdentifierKind, User};
use super::provider::validate_secret_shape;
use super::request_context::RequestContext;
use super::session::SessionManager;
use super::token::{session_id_from_claims, ClaimMap, CLAIM_SESSION_ID};

pub const PASSWORD_RESET_TTL_SECS: i64 = 2 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
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
    pub password: String,
    pub active: i32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

impl SessionManager {
    async fn hash_secret(&self, password: &str) -> AuthResult<String> {
        let params = self.hash_params;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || security::hash_password_with(&password, &params))
            .await
            .map_err(|e| AuthError::Internal(format!("password hashing task failed: {e}")))?
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Store a new user whose password is hashed here; the raw password never reaches the store.
    pub async fn create_user(&self, ctx: &RequestContext, req: &CreateUserRequest) -> AuthResult<User> {
        validate_secret_shape(&req.password)?;
        let (login, email, phone) = (non_empty(&req.login), non_empty(&req.email), non_empty(&req.phone));
        if login.is_none() && email.is_none() && phone.is_none() {
            return Err(AuthError::InvalidArgument("login, email or phone is required".into()));
        }
        if email.as_deref().is_some_and(|e| IdentifierKind::classify(e) != IdentifierKind::Email) {
            return Err(AuthError::InvalidArgument("email is not valid".into()));
        }
        if phone.as_deref().is_some_and(|p| IdentifierKind::classify(p) != IdentifierKind::Phone) {
            return Err(AuthError::InvalidArgument("phone is not valid".into()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            project_id: req.project_id,
            client_platform_id: req.client_platform_id,
            client_type_id: req.client_type_id,
            role_id: req.role_id,
            name: req.name.clone(),
            photo_url: req.photo_url.clone(),
            phone,
            email,
            login,
            password_hash: self.hash_secret(&req.password).await?,
            active: req.active,
            expires_at: req.expires_at,
            created_at: now,
            updated_at: now,
        };
        let id = ctx.run(self.store.create_user(user)).await?;
        info!(target: "gatekeep::session", user_id = %id, "user created");
        Ok(ctx.run(self.store.get_user(id)).await?)
    }

    /// Token that authorizes one password change for the user behind `identifier`.
    pub async fn issue_password_reset_token(&self, ctx: &RequestContext, identifier: &str) -> AuthResult<String> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(AuthError::InvalidArgument("identifier is required".into()));
        }
        let kind = IdentifierKind::classify(identifier);
        let user = ctx
            .run(self.store.find_user_by_identifier(kind, identifier))
            .await
            .map_err(|e| e.or_not_found(AuthError::NotFound("user".into())))?;
        let mut claims = ClaimMap::new();
        claims.insert(CLAIM_SESSION_ID.into(), Value::from(user.id.to_string()));
        let token = self.tokens.issue(&claims, Duration::seconds(PASSWORD_RESET_TTL_SECS))?;
        info!(target: "gatekeep::session", user_id = %user.id, "password reset token issued");
        Ok(token)
    }

    pub async fn reset_password(&self, ctx: &RequestContext, req: &ResetPasswordRequest) -> AuthResult<User> {
        validate_secret_shape(&req.password)?;
        let claims = self.tokens.verify(&req.token)?;
        // Session tokens also carry `id`; only the bare reset claim set is accepted.
        if claims.contains_key("role_id") {
            warn!(target: "gatekeep::session", "session token presented as a reset token");
            return Err(AuthError::InvalidToken);
        }
        let user_id = session_id_from_claims(&claims)?;

        let mut user = ctx
            .run(self.store.get_user(user_id))
            .await
            .map_err(|e| e.or_not_found(AuthError::NotFound("user".into())))?;
        user.password_hash = self.hash_secret(&req.password).await?;
        if ctx.run(self.store.update_user(user)).await? == 0 {
            return Err(AuthError::NotFound("user".into()));
        }
        info!(target: "gatekeep::session", user_id = %user_id, "password reset");
        Ok(ctx.run(self.store.get_user(user_id)).await?)
    }
}
