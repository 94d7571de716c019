pub mod config;
pub mod error;
pub mod identity;
pub mod security;
pub mod server;
pub mod storage;

pub use config::{Config, ConfigError, Environment};
pub use error::{AuthError, AuthResult};
