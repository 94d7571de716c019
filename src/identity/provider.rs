//! Credential checks shared by every entry point: secret verification and the
//! principal state gate (active flag + absolute expiry).

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tracing::error;

use crate::error::{AuthError, AuthResult};
use crate::security;
use crate::storage::{Client, LoginStrategy};

use super::principal::{ActiveState, Integration, Principal, User};

pub const MIN_SECRET_LEN: usize = 6;
pub const INTEGRATION_SECRET_BYTES: usize = 24;

/// Argon2id at the default cost, matching no real account. Unknown identifiers are
/// verified against it so their rejection costs as much as a wrong password.
pub(crate) const UNKNOWN_USER_HASH: &str =
    "$argon2id$v=19$m=65536,t=3,p=4$bm8tc3VjaC11c2VyLXBhZA$JA1OQVy7hIeInonP2gVfCjXNO0UDzL38Jv2AE1MnOhs";

pub fn validate_secret_shape(secret: &str) -> AuthResult<()> {
    if secret.chars().count() < MIN_SECRET_LEN {
        return Err(AuthError::InvalidArgument(format!("secret must be at least {MIN_SECRET_LEN} characters")));
    }
    Ok(())
}

/// Argon2 verification on the blocking pool; a mismatch is `InvalidCredential`.
pub async fn verify_user_password(user: &User, password: &str) -> AuthResult<()> {
    let hash = user.password_hash.clone();
    let candidate = password.to_string();
    let matched = tokio::task::spawn_blocking(move || security::verify_password(&hash, &candidate))
        .await
        .map_err(|e| AuthError::Internal(format!("password verification task failed: {e}")))?
        .map_err(|e| {
            error!(target: "gatekeep::session", user_id = %user.id, "stored password hash unusable: {e}");
            AuthError::Internal("stored credential is unusable".into())
        })?;
    if matched { Ok(()) } else { Err(AuthError::InvalidCredential) }
}

/// Spend one full verification on a login whose identifier matched no user.
pub async fn reject_unknown_user(password: &str) -> AuthError {
    let candidate = password.to_string();
    match tokio::task::spawn_blocking(move || security::verify_password(UNKNOWN_USER_HASH, &candidate)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!(target: "gatekeep::session", "placeholder hash unusable: {e}"),
        Err(e) => error!(target: "gatekeep::session", "password verification task failed: {e}"),
    }
    AuthError::InvalidCredential
}

/// Integration keys are pre-shared and compared for exact equality in constant time.
pub fn verify_integration_secret(integration: &Integration, secret: &str) -> AuthResult<()> {
    let equal: bool = integration.secret_key.as_bytes().ct_eq(secret.as_bytes()).into();
    if equal { Ok(()) } else { Err(AuthError::InvalidCredential) }
}

/// Fresh pre-shared key for provisioning an integration.
pub fn generate_integration_secret() -> AuthResult<String> {
    security::random_string(INTEGRATION_SECRET_BYTES).map_err(|e| AuthError::Internal(e.to_string()))
}

/// Active/expiry gate applied at login, refresh and access checks alike.
pub fn ensure_usable(principal: &Principal, now: DateTime<Utc>) -> AuthResult<()> {
    let integration = matches!(principal, Principal::Integration(_));
    match principal.active_state() {
        ActiveState::Disabled if integration => return Err(AuthError::IntegrationDisabled),
        ActiveState::Disabled => return Err(AuthError::AccountDisabled),
        ActiveState::Pending if integration => return Err(AuthError::IntegrationPending),
        ActiveState::Pending => return Err(AuthError::AccountPending),
        ActiveState::Active => {}
    }
    if principal.expires_at() < now {
        return Err(if integration { AuthError::IntegrationExpired } else { AuthError::AccountExpired });
    }
    Ok(())
}

/// Only the standard password strategy is served here.
pub fn ensure_standard_strategy(client: &Client) -> AuthResult<()> {
    match client.login_strategy {
        LoginStrategy::Standard => Ok(()),
        other => Err(AuthError::InvalidArgument(format!("incorrect login strategy: {}", other.as_str()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn user(active: i32, expires_in: Duration) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            client_platform_id: Uuid::nil(),
            client_type_id: Uuid::nil(),
            role_id: Uuid::nil(),
            name: String::new(),
            photo_url: String::new(),
            phone: None,
            email: None,
            login: Some("alice".into()),
            password_hash: String::new(),
            active,
            expires_at: now + expires_in,
            created_at: now,
            updated_at: now,
        }
    }

    fn integration(active: i32, expires_in: Duration, secret: &str) -> Integration {
        let now = Utc::now();
        Integration {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            client_platform_id: Uuid::nil(),
            client_type_id: Uuid::nil(),
            role_id: Uuid::nil(),
            title: "ci".into(),
            secret_key: secret.into(),
            active,
            expires_at: now + expires_in,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn user_gate() {
        let now = Utc::now();
        assert!(ensure_usable(&Principal::User(user(1, Duration::days(1))), now).is_ok());
        assert_eq!(ensure_usable(&Principal::User(user(-1, Duration::days(1))), now), Err(AuthError::AccountDisabled));
        assert_eq!(ensure_usable(&Principal::User(user(0, Duration::days(1))), now), Err(AuthError::AccountPending));
        assert_eq!(ensure_usable(&Principal::User(user(1, Duration::days(-1))), now), Err(AuthError::AccountExpired));
    }

    #[test]
    fn integration_gate() {
        let now = Utc::now();
        let p = |a, d| Principal::Integration(integration(a, d, "k"));
        assert!(ensure_usable(&p(1, Duration::days(1)), now).is_ok());
        assert_eq!(ensure_usable(&p(-3, Duration::days(1)), now), Err(AuthError::IntegrationDisabled));
        assert_eq!(ensure_usable(&p(0, Duration::days(1)), now), Err(AuthError::IntegrationPending));
        assert_eq!(ensure_usable(&p(1, Duration::days(-1)), now), Err(AuthError::IntegrationExpired));
    }

    #[test]
    fn integration_secret_comparison() {
        let i = integration(1, Duration::days(1), "s3cr3t-key");
        assert!(verify_integration_secret(&i, "s3cr3t-key").is_ok());
        assert_eq!(verify_integration_secret(&i, "s3cr3t-kez"), Err(AuthError::InvalidCredential));
        assert_eq!(verify_integration_secret(&i, "s3cr3t"), Err(AuthError::InvalidCredential));
    }

    #[test]
    fn generated_integration_secrets_are_usable() {
        let a = generate_integration_secret().unwrap();
        let b = generate_integration_secret().unwrap();
        assert_ne!(a, b);
        assert!(validate_secret_shape(&a).is_ok());
        assert!(verify_integration_secret(&integration(1, Duration::days(1), &a), &a).is_ok());
    }

    #[tokio::test]
    async fn unknown_user_pays_for_a_default_cost_verification() {
        let parsed = password_hash::PasswordHash::new(UNKNOWN_USER_HASH).unwrap();
        let defaults = security::HashParams::default();
        assert_eq!(parsed.params.get_decimal("m"), Some(defaults.m_cost));
        assert_eq!(parsed.params.get_decimal("t"), Some(defaults.t_cost));
        assert_eq!(parsed.params.get_decimal("p"), Some(defaults.p_cost));
        assert_eq!(security::verify_password(UNKNOWN_USER_HASH, "secret1"), Ok(false));
        assert_eq!(reject_unknown_user("secret1").await, AuthError::InvalidCredential);
    }

    #[test]
    fn secret_shape() {
        assert!(validate_secret_shape("secret1").is_ok());
        assert!(matches!(validate_secret_shape("abc"), Err(AuthError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn password_check_runs_off_the_runtime() {
        let params = security::HashParams { m_cost: 1024, t_cost: 1, p_cost: 1, output_len: 32 };
        let mut u = user(1, Duration::days(1));
        u.password_hash = security::hash_password_with("secret1", &params).unwrap();
        assert!(verify_user_password(&u, "secret1").await.is_ok());
        assert_eq!(verify_user_password(&u, "secret2").await, Err(AuthError::InvalidCredential));
        u.password_hash = "garbage".into();
        assert!(matches!(verify_user_password(&u, "secret1").await, Err(AuthError::Internal(_))));
    }
}
