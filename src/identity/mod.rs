//! Central identity and session management: principals, credential checks,
//! signed tokens, session lifecycle and per-request access decisions.
//! Keep the public surface thin and split implementation across sub-modules.

mod account;
mod authorizer;
mod hierarchy;
mod principal;
mod provider;
mod request_context;
mod session;
mod token;

pub use account::{CreateUserRequest, ResetPasswordRequest, PASSWORD_RESET_TTL_SECS};
pub use authorizer::{AccessDecisionEngine, HasAccessRequest};
pub use hierarchy::{check_parent_link, resolve_names, HierarchyError, PermissionResolver, ResolvedPermission, NAME_SEPARATOR};
pub use principal::{ActiveState, IdentifierKind, Integration, Principal, PrincipalId, User};
pub use provider::{ensure_usable, generate_integration_secret, validate_secret_shape, MIN_SECRET_LEN};
pub use request_context::RequestContext;
pub use session::{
    session_claims, IntegrationLoginRequest, IntegrationLoginResponse, LoginRequest, LoginResponse, SessionManager, Token,
};
pub use token::{session_id_from_claims, ClaimMap, TokenCodec, TokenSettings};
