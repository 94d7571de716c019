use std::sync::Arc;

use gatekeep::config::Config;
use gatekeep::storage::{CredentialStore, MemoryStore};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "gatekeep",
        "gatekeep starting: RUST_LOG='{}', environment={:?}, http_addr={}, access_ttl={:?}, refresh_ttl={:?}, database={}",
        rust_log,
        config.environment,
        config.http_addr,
        config.access_ttl,
        config.refresh_ttl,
        if config.database_url.is_some() { "postgres" } else { "memory" }
    );

    let store = open_store(&config).await?;
    gatekeep::server::run(config, store).await
}

#[cfg(feature = "postgres")]
async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn CredentialStore>> {
    use anyhow::Context;

    if config.database_url.is_none() {
        warn!(target: "gatekeep", "DATABASE_URL not set; using the in-memory credential store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = gatekeep::storage::PgStore::connect(config).await.context("while connecting to Postgres")?;
    store.install_schema().await.context("while installing the credential schema")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn CredentialStore>> {
    if config.database_url.is_some() {
        warn!(target: "gatekeep", "built without the `postgres` feature; DATABASE_URL is ignored");
    }
    Ok(Arc::new(MemoryStore::new()))
}
