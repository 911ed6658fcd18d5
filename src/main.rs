use anyhow::{Context, Result};
use axum::Router;
use object_links::{
    LinkCodec, ObjectStore,
    config::AppConfig,
    routes,
    services::storage_service::{LocalStorage, validate_bucket_name},
    state::AppState,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting object-links: bucket `{}`, storage {}, links under {}",
        cfg.bucket,
        cfg.storage_dir,
        cfg.public_url
    );
    validate_bucket_name(&cfg.bucket).context("checking configured bucket")?;
    if cfg.signing_secret.is_none() {
        tracing::warn!("OBJECT_LINKS_SIGNING_SECRET is unset; presigned links will fail");
    }
    if cfg.api_token.is_none() {
        tracing::warn!("OBJECT_LINKS_API_TOKEN is unset; upload, delete and presign are disabled");
    }

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    if let Err(e) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(db_path)
    {
        tracing::warn!("Failed to open database file {}: {}", db_path, e);
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .with_context(|| format!("connecting to {}", db_url))?,
    );

    let endpoint = Url::parse(&cfg.public_url)
        .with_context(|| format!("parsing public url `{}`", cfg.public_url))?;
    let backend = LocalStorage::new(
        db,
        cfg.storage_dir.clone(),
        endpoint,
        cfg.signing_secret.clone(),
    );
    backend.migrate().await.context("running migrations")?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize facade ---
    let codec = LinkCodec::with_endpoint(&cfg.public_url)?;
    let store = ObjectStore::new(Arc::new(backend.clone()), cfg.bucket.clone(), codec)
        .with_timeout(cfg.timeout);

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes)
        .with_state(AppState {
            store,
            backend,
            api_token: cfg.api_token.as_deref().map(Into::into),
        });

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
