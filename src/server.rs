//!
//! gatekeep HTTP server
//! --------------------
//! Thin Axum transport over the authentication core.
//!
//! Responsibilities:
//! - Map JSON requests onto `SessionManager`, `AccessDecisionEngine` and `PermissionResolver`.
//! - Put a per-request deadline on every store call (`RequestContext`).
//! - Render `AuthError` as a stable status code plus a non-leaking message.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AuthError, ErrorBody};
use crate::identity::{
    AccessDecisionEngine, HasAccessRequest, IntegrationLoginRequest, LoginRequest, PermissionResolver, RequestContext,
    ResetPasswordRequest, SessionManager, TokenCodec,
};
use crate::storage::CredentialStore;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub access: Arc<AccessDecisionEngine>,
    pub permissions: Arc<PermissionResolver>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> Self {
        let tokens = TokenCodec::new(&config.token_settings());
        Self {
            sessions: Arc::new(SessionManager::new(store.clone(), tokens.clone())),
            access: Arc::new(AccessDecisionEngine::new(store.clone(), tokens)),
            permissions: Arc::new(PermissionResolver::new(store)),
            request_timeout: config.request_timeout,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(target: "gatekeep::server", code = self.code_str(), "request failed: {self}");
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return None;
    }
    Some(token.trim().to_string())
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    forwarded.or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()).map(|v| v.trim().to_string()))
}

fn request_context(state: &AppState, headers: &HeaderMap) -> RequestContext {
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut ctx = RequestContext::with_timeout(state.request_timeout).with_request_id(request_id);
    if let Some(ip) = client_ip(headers) {
        ctx = ctx.with_ip(ip);
    }
    ctx
}

/// Body token wins; the bearer header is the fallback.
fn pick_token(body: Option<String>, headers: &HeaderMap) -> Result<String, AuthError> {
    body.filter(|t| !t.trim().is_empty())
        .or_else(|| bearer_token(headers))
        .ok_or_else(|| AuthError::InvalidArgument("token is required".into()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "gatekeep ok" }))
        .route("/v1/login", post(login))
        .route("/v1/logout", post(logout))
        .route("/v1/refresh", post(refresh))
        .route("/v1/has-access", post(has_access))
        .route("/v1/password/reset", post(reset_password))
        .route("/v1/integration/session", post(integration_login))
        .route("/v1/integration/token", post(integration_token))
        .route("/v1/integration/{id}/sessions", get(integration_sessions))
        .route("/v1/integration/{id}/sessions/{session_id}", delete(delete_integration_session))
        .route("/v1/roles/{id}/permissions", get(role_permissions))
        .route("/v1/platforms/{id}/permissions", get(platform_permissions))
        .with_state(state)
}

/// Serve until the listener fails.
pub async fn run(config: Config, store: Arc<dyn CredentialStore>) -> anyhow::Result<()> {
    let addr = config.http_addr;
    let app = router(AppState::new(&config, store));
    info!(target: "gatekeep::server", "HTTP listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn login(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<LoginRequest>) -> Result<impl IntoResponse, AuthError> {
    let ctx = request_context(&state, &headers);
    Ok(Json(state.sessions.login(&ctx, &req).await?))
}

#[derive(Debug, Default, Deserialize)]
struct TokenPayload {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

async fn logout(State(state): State<AppState>, headers: HeaderMap, body: Option<Json<TokenPayload>>) -> Result<impl IntoResponse, AuthError> {
    let ctx = request_context(&state, &headers);
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let token = pick_token(body.access_token, &headers)?;
    state.sessions.logout(&ctx, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn refresh(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<TokenPayload>) -> Result<impl IntoResponse, AuthError> {
    let ctx = request_context(&state, &headers);
    let token = pick_token(body.refresh_token, &headers)?;
    Ok(Json(state.sessions.refresh(&ctx, &token).await?))
}

async fn has_access(State(state): State<AppState>, headers: HeaderMap, Json(mut req): Json<HasAccessRequest>) -> Result<impl IntoResponse, AuthError> {
    let ctx = request_context(&state, &headers);
    req.access_token = pick_token(Some(req.access_token), &headers)?;
    Ok(Json(state.access.has_access(&ctx, &req).await?))
}

async fn reset_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let ctx = request_context(&state, &headers);
    Ok(Json(state.sessions.reset_password(&ctx, &req).await?))
}

async fn integration_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IntegrationLoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let ctx = request_context(&state, &headers);
    Ok(Json(state.sessions.add_session_to_integration(&ctx, &req).await?))
}

#[derive(Debug, Deserialize)]
struct IntegrationTokenPayload {
    integration_id: Uuid,
    session_id: Uuid,
}

async fn integration_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IntegrationTokenPayload>,
) -> Result<impl IntoResponse, AuthError> {
    let ctx = request_context(&state, &headers);
    Ok(Json(state.sessions.get_integration_token(&ctx, req.integration_id, req.session_id).await?))
}

async fn integration_sessions(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AuthError> {
    let ctx = request_context(&state, &headers);
    Ok(Json(state.sessions.integration_sessions(&ctx, id).await?))
}

async fn delete_integration_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, session_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AuthError> {
    let ctx = request_context(&state, &headers);
    state.sessions.delete_integration_session(&ctx, id, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn role_permissions(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AuthError> {
    let ctx = request_context(&state, &headers);
    Ok(Json(state.permissions.for_role(&ctx, id).await?))
}

async fn platform_permissions(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AuthError> {
    let ctx = request_context(&state, &headers);
    Ok(Json(state.permissions.for_platform(&ctx, id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_parsing() {
        let mut h = HeaderMap::new();
        assert_eq!(bearer_token(&h), None);
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&h).as_deref(), Some("abc.def.ghi"));
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(bearer_token(&h), None);
    }

    #[test]
    fn body_token_wins_over_header() {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer from-header"));
        assert_eq!(pick_token(Some("from-body".into()), &h), Ok("from-body".into()));
        assert_eq!(pick_token(Some("  ".into()), &h), Ok("from-header".into()));
        assert!(matches!(pick_token(None, &HeaderMap::new()), Err(AuthError::InvalidArgument(_))));
    }

    #[test]
    fn forwarded_ip_takes_first_hop() {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&h).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn errors_render_with_mapped_status() {
        assert_eq!(AuthError::Denied.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::SessionNotFound.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::StorageUnavailable("x".into()).into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
