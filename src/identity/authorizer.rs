use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::storage::{normalize_method, CredentialStore, Session};

use super::request_context::RequestContext;
use super::session::resolve_session;
use super::token::TokenCodec;

#[derive(Debug, Clone, Deserialize)]
pub struct HasAccessRequest {
    /// May be left empty when the transport supplies a bearer header instead.
    #[serde(default)]
    pub access_token: String,
    pub client_platform_id: Uuid,
    pub path: String,
    pub method: String,
}

/// Per-request authorization: is the bearer of this access token allowed to call
/// (platform, path, method)? Usage counting never blocks the decision.
pub struct AccessDecisionEngine {
    store: Arc<dyn CredentialStore>,
    tokens: TokenCodec,
}

impl AccessDecisionEngine {
    pub fn new(store: Arc<dyn CredentialStore>, tokens: TokenCodec) -> Self { Self { store, tokens } }

    /// Returns the live session on Allow.
    pub async fn has_access(&self, ctx: &RequestContext, req: &HasAccessRequest) -> AuthResult<Session> {
        let path = req.path.trim();
        let method = normalize_method(&req.method);
        if path.is_empty() || method.is_empty() {
            return Err(AuthError::InvalidArgument("path and method are required".into()));
        }

        let (session, _principal) = resolve_session(&*self.store, &self.tokens, ctx, &req.access_token)
            .await
            .map_err(|e| {
                debug!(target: "gatekeep::access", code = e.code_str(), path, method = %method, "access check rejected before decision");
                e
            })?;

        match ctx.run(self.store.upsert_scope_and_increment(req.client_platform_id, path, &method)).await {
            Ok(scope) => debug!(target: "gatekeep::access", path, method = %method, requests = scope.requests, "scope recorded"),
            Err(e) => warn!(target: "gatekeep::access", path, method = %method, "scope accounting failed, continuing: {e}"),
        }

        let allowed = ctx
            .run(self.store.role_has_permission_scope(session.role_id, req.client_platform_id, path, &method))
            .await?;
        if !allowed {
            warn!(
                target: "gatekeep::access",
                session_id = %session.id,
                principal = %session.principal.uuid(),
                role_id = %session.role_id,
                path,
                method = %method,
                "access denied"
            );
            return Err(AuthError::Denied);
        }
        Ok(session)
    }
}
