//! Access decision integration tests: role -> permission -> scope grants,
//! usage accounting and the permission hierarchy listing.

mod support;

use anyhow::Result;
use chrono::{Duration, Utc};
use uuid::Uuid;

use gatekeep::identity::{
    session_claims, HasAccessRequest, IntegrationLoginRequest, LoginRequest, PrincipalId, RequestContext, Token,
};
use gatekeep::storage::{NewSession, PermissionScope, PermissionStore, RoleStore, SessionStore, UserStore};
use gatekeep::AuthError;

use support::Fixture;

async fn login_alice(fx: &Fixture) -> Result<Token> {
    let req = LoginRequest { identifier: "alice".into(), password: "secret1".into(), ip: None, data: None };
    Ok(fx.sessions.login(&RequestContext::default(), &req).await?.token)
}

fn check(fx: &Fixture, token: &Token, path: &str, method: &str) -> HasAccessRequest {
    HasAccessRequest {
        access_token: token.access_token.clone(),
        client_platform_id: fx.platform_id,
        path: path.into(),
        method: method.into(),
    }
}

#[tokio::test]
async fn grant_allows_exact_method_and_counts_every_call() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.seed_user("alice", "secret1", 1, Duration::days(365)).await?;
    fx.grant("/x", "GET").await?;
    let token = login_alice(&fx).await?;
    let ctx = RequestContext::default();

    let session = fx.access.has_access(&ctx, &check(&fx, &token, "/x", "GET")).await?;
    assert_eq!(session.role_id, fx.role_id);
    assert_eq!(fx.requests("/x", "GET").await?, 1);

    assert_eq!(fx.access.has_access(&ctx, &check(&fx, &token, "/x", "POST")).await, Err(AuthError::Denied));
    assert_eq!(fx.requests("/x", "POST").await?, 1);
    assert_eq!(fx.requests("/x", "GET").await?, 1);

    // Methods compare case-insensitively.
    fx.access.has_access(&ctx, &check(&fx, &token, "/x", "get")).await?;
    assert_eq!(fx.requests("/x", "GET").await?, 2);
    Ok(())
}

#[tokio::test]
async fn viewer_without_permissions_is_denied_and_still_counted() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.seed_user("alice", "secret1", 1, Duration::days(365)).await?;
    let token = login_alice(&fx).await?;
    let ctx = RequestContext::default();

    let req = check(&fx, &token, "/admin", "DELETE");
    assert_eq!(fx.access.has_access(&ctx, &req).await, Err(AuthError::Denied));
    assert_eq!(fx.requests("/admin", "DELETE").await?, 1);
    assert_eq!(fx.access.has_access(&ctx, &req).await, Err(AuthError::Denied));
    assert_eq!(fx.requests("/admin", "DELETE").await?, 2);
    Ok(())
}

#[tokio::test]
async fn grants_on_other_platforms_do_not_apply() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.seed_user("alice", "secret1", 1, Duration::days(365)).await?;
    fx.grant("/x", "GET").await?;
    let token = login_alice(&fx).await?;

    let mut req = check(&fx, &token, "/x", "GET");
    req.client_platform_id = Uuid::new_v4();
    assert_eq!(fx.access.has_access(&RequestContext::default(), &req).await, Err(AuthError::Denied));
    Ok(())
}

#[tokio::test]
async fn expired_principal_fails_even_with_live_session() -> Result<()> {
    let fx = Fixture::new().await?;
    let mut user = fx.seed_user("alice", "secret1", 1, Duration::days(365)).await?;
    fx.grant("/x", "GET").await?;
    let token = login_alice(&fx).await?;

    user.expires_at = Utc::now() - Duration::seconds(1);
    fx.store.update_user(user).await?;
    let res = fx.access.has_access(&RequestContext::default(), &check(&fx, &token, "/x", "GET")).await;
    assert_eq!(res, Err(AuthError::AccountExpired));
    Ok(())
}

#[tokio::test]
async fn revoked_session_cannot_pass_the_gate() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.seed_user("alice", "secret1", 1, Duration::days(365)).await?;
    fx.grant("/x", "GET").await?;
    let token = login_alice(&fx).await?;
    let ctx = RequestContext::default();

    fx.sessions.logout(&ctx, &token.access_token).await?;
    let res = fx.access.has_access(&ctx, &check(&fx, &token, "/x", "GET")).await;
    assert_eq!(res, Err(AuthError::SessionNotFound));
    Ok(())
}

#[tokio::test]
async fn revoking_a_grant_takes_effect_immediately() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.seed_user("alice", "secret1", 1, Duration::days(365)).await?;
    let pid = fx.grant("/reports", "GET").await?;
    let token = login_alice(&fx).await?;
    let ctx = RequestContext::default();

    fx.access.has_access(&ctx, &check(&fx, &token, "/reports", "GET")).await?;
    fx.store.remove_role_permission(fx.role_id, pid).await?;
    assert_eq!(fx.access.has_access(&ctx, &check(&fx, &token, "/reports", "GET")).await, Err(AuthError::Denied));
    Ok(())
}

#[tokio::test]
async fn accounting_outage_does_not_change_the_decision() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.seed_user("alice", "secret1", 1, Duration::days(365)).await?;
    fx.grant("/x", "GET").await?;
    let token = login_alice(&fx).await?;
    let ctx = RequestContext::default();

    fx.store.set_scope_writes_offline(true);
    assert!(fx.access.has_access(&ctx, &check(&fx, &token, "/x", "GET")).await.is_ok());
    assert_eq!(fx.access.has_access(&ctx, &check(&fx, &token, "/y", "GET")).await, Err(AuthError::Denied));
    fx.store.set_scope_writes_offline(false);
    assert!(fx.requests("/y", "GET").await.is_err());
    Ok(())
}

#[tokio::test]
async fn bad_tokens_and_requests_are_rejected() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.seed_user("alice", "secret1", 1, Duration::days(365)).await?;
    let token = login_alice(&fx).await?;
    let ctx = RequestContext::default();

    let mut tampered = check(&fx, &token, "/x", "GET");
    tampered.access_token.push('x');
    assert_eq!(fx.access.has_access(&ctx, &tampered).await, Err(AuthError::InvalidToken));

    let mut garbage = check(&fx, &token, "/x", "GET");
    garbage.access_token = "not-a-token".into();
    assert!(matches!(fx.access.has_access(&ctx, &garbage).await, Err(AuthError::TokenParse(_))));

    let empty_path = check(&fx, &token, " ", "GET");
    assert!(matches!(fx.access.has_access(&ctx, &empty_path).await, Err(AuthError::InvalidArgument(_))));
    Ok(())
}

#[tokio::test]
async fn role_permissions_list_with_qualified_names() -> Result<()> {
    let fx = Fixture::new().await?;
    let admin = fx.permission(None, "admin").await?;
    let users = fx.permission(Some(admin), "users").await?;
    let delete = fx.permission(Some(users), "delete").await?;
    fx.store.add_role_permissions(fx.role_id, &[delete, admin]).await?;
    let ctx = RequestContext::default();

    let by_role = fx.resolver.for_role(&ctx, fx.role_id).await?;
    let names: Vec<&str> = by_role.iter().map(|p| p.qualified_name.as_str()).collect();
    // `users` is not attached to the role, so the chain stops there.
    assert_eq!(names, vec!["admin", "delete"]);

    let by_platform = fx.resolver.for_platform(&ctx, fx.platform_id).await?;
    let names: Vec<&str> = by_platform.iter().map(|p| p.qualified_name.as_str()).collect();
    assert_eq!(names, vec!["admin", "admin/users", "admin/users/delete"]);

    assert!(matches!(
        fx.store.set_permission_parent(admin, Some(delete)).await,
        Err(gatekeep::storage::StoreError::InvalidArgument(_))
    ));
    Ok(())
}

#[tokio::test]
async fn removing_a_scope_grant_denies_the_path() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.seed_user("alice", "secret1", 1, Duration::days(365)).await?;
    let pid = fx.grant("/x", "GET").await?;
    let token = login_alice(&fx).await?;
    let ctx = RequestContext::default();

    fx.access.has_access(&ctx, &check(&fx, &token, "/x", "GET")).await?;
    let removed = fx.store.remove_permission_scope(&PermissionScope::new(pid, fx.platform_id, "/x", "get")).await?;
    assert_eq!(removed, 1);
    assert_eq!(fx.access.has_access(&ctx, &check(&fx, &token, "/x", "GET")).await, Err(AuthError::Denied));
    Ok(())
}

#[tokio::test]
async fn integration_sessions_go_through_the_same_gate() -> Result<()> {
    let fx = Fixture::new().await?;
    let integration = fx.seed_integration("pre-shared-key", 1, Duration::days(10)).await?;
    fx.grant("/jobs", "POST").await?;
    let ctx = RequestContext::default();
    let req = IntegrationLoginRequest {
        integration_id: integration.id,
        secret_key: "pre-shared-key".into(),
        expires_at: Utc::now() + Duration::hours(1),
        ip: None,
        data: None,
    };
    let token = fx.sessions.add_session_to_integration(&ctx, &req).await?.token;

    let session = fx.access.has_access(&ctx, &check(&fx, &token, "/jobs", "POST")).await?;
    assert_eq!(session.principal, PrincipalId::Integration(integration.id));
    assert_eq!(fx.access.has_access(&ctx, &check(&fx, &token, "/jobs", "DELETE")).await, Err(AuthError::Denied));
    assert_eq!(fx.requests("/jobs", "POST").await?, 1);
    Ok(())
}

#[tokio::test]
async fn lapsed_session_row_is_rejected_for_a_live_user() -> Result<()> {
    let fx = Fixture::new().await?;
    let user = fx.seed_user("alice", "secret1", 1, Duration::days(365)).await?;
    fx.grant("/x", "GET").await?;
    let id = fx
        .store
        .create_session(NewSession {
            project_id: fx.project_id,
            client_platform_id: fx.platform_id,
            client_type_id: fx.client_type_id,
            principal: PrincipalId::User(user.id),
            role_id: fx.role_id,
            ip: "0.0.0.0".into(),
            data: String::new(),
            expires_at: Utc::now() - Duration::seconds(1),
        })
        .await?;
    let (access_token, refresh_token) = fx.tokens.issue_pair(&session_claims(&fx.store.get_session(id).await?))?;
    let token = Token {
        access_token,
        refresh_token,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        expires_at: Utc::now(),
        refresh_in_seconds: 0,
    };
    let res = fx.access.has_access(&RequestContext::default(), &check(&fx, &token, "/x", "GET")).await;
    assert_eq!(res, Err(AuthError::SessionNotFound));
    // Rejected before the usage counter is touched.
    assert!(fx.requests("/x", "GET").await.is_err());
    Ok(())
}
