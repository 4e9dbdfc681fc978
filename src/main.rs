use anyhow::{Context, Result};
use axum::Router;
use recipe_media::{
    config::{AppConfig, RunMode},
    routes::routes::routes,
    services::{
        coordinator::MediaCoordinator,
        media_store::MediaStore,
        reconcile::reconcile,
        repository::{SqliteEntityRepository, run_migrations},
        sanitizer::{AcceptPolicy, Sanitizer},
    },
    state::AppState,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting recipe-media with config: {:?}", cfg);

    // --- Ensure media root exists ---
    if !cfg.media_root.exists() {
        fs::create_dir_all(&cfg.media_root).await?;
        tracing::info!("Created media root at {}", cfg.media_root.display());
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
            fs::create_dir_all(parent).await?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect_options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url {}", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("connecting to {}", db_url))?,
    );

    let repo = SqliteEntityRepository::new(db.clone());
    let store = MediaStore::new(cfg.media_root.clone());

    // --- One-shot modes ---
    match mode {
        RunMode::Migrate => {
            run_migrations(&db).await?;
            tracing::info!("Database migration complete.");
            return Ok(());
        }
        RunMode::Reconcile => {
            let divergences = reconcile(&repo, &store).await?;
            for d in &divergences {
                tracing::warn!(
                    "{} `{}`: orphaned files {:?}, dangling references {:?}{}",
                    d.kind,
                    d.id,
                    d.orphaned_files,
                    d.dangling_refs,
                    if d.missing_entity { " (no such record)" } else { "" }
                );
            }
            tracing::info!("Reconcile found {} divergent entities.", divergences.len());
            return Ok(());
        }
        RunMode::Serve => {}
    }

    // --- Initialize core services ---
    let policy = AcceptPolicy::new(&cfg.accept_pattern)
        .with_context(|| format!("compiling accept pattern `{}`", cfg.accept_pattern))?;
    let coordinator = MediaCoordinator::new(Arc::new(repo), store, Sanitizer::new(policy));
    let state = AppState::new(db, coordinator);

    // --- Build router ---
    let app: Router = routes(cfg.max_upload_bytes).with_state(state);

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
