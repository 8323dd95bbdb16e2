use anyhow::{Context, Result};
use ciaos::{
    auth::{Authenticator, credentials::CredentialStore},
    config::AppConfig,
    db,
    routes::routes::routes,
    services::object_store::ObjectStore,
    state::AppState,
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting ciaos with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let pool = db::connect(db_url, 5)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;

    db::run_migrations(&pool).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let store = ObjectStore::new(Arc::new(pool), cfg.storage_dir.clone());
    let credentials = CredentialStore::new(cfg.credentials.clone());
    tracing::info!("Loaded {} credential(s)", credentials.len());
    let authenticator = Authenticator::new(
        credentials,
        cfg.region.clone(),
        Duration::from_secs(cfg.max_clock_skew_secs),
    );

    let state = AppState {
        store,
        authenticator: Arc::new(authenticator),
        max_body_bytes: usize::try_from(cfg.max_body_bytes).unwrap_or(usize::MAX),
        max_buffered_body_bytes: usize::try_from(cfg.max_buffered_body_bytes)
            .unwrap_or(usize::MAX),
    };

    // --- Build router ---
    let app = routes(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
