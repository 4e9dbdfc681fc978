use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf};

const DEFAULT_ACCEPT_PATTERN: &str = "^image/(jpeg|png)$";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub media_root: PathBuf,
    pub database_url: String,
    pub accept_pattern: String,
    pub max_upload_bytes: usize,
}

/// What to do after configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Reconcile,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Recipe catalog media ingestion service")]
pub struct Args {
    /// Host to bind to (overrides RECIPE_MEDIA_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RECIPE_MEDIA_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding one media directory per entity (overrides RECIPE_MEDIA_ROOT)
    #[arg(long)]
    pub media_root: Option<PathBuf>,

    /// Database URL (overrides RECIPE_MEDIA_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Regex that sniffed content types must match (overrides RECIPE_MEDIA_ACCEPT)
    #[arg(long)]
    pub accept_pattern: Option<String>,

    /// Largest accepted request body in bytes (overrides RECIPE_MEDIA_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long, conflicts_with = "reconcile")]
    pub migrate: bool,

    /// Report media directories that disagree with entity records and exit
    #[arg(long)]
    pub reconcile: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::from_args(Args::parse())
    }

    /// Resolve already-parsed CLI args against the environment.
    pub fn from_args(args: Args) -> Result<(Self, RunMode)> {
        // --- Environment fallback ---
        let env_host = env::var("RECIPE_MEDIA_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("RECIPE_MEDIA_PORT", 3000u16)?;
        let env_root = env::var("RECIPE_MEDIA_ROOT").unwrap_or_else(|_| "./data/media".into());
        let env_db = env::var("RECIPE_MEDIA_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/recipes.db".into());
        let env_accept =
            env::var("RECIPE_MEDIA_ACCEPT").unwrap_or_else(|_| DEFAULT_ACCEPT_PATTERN.into());
        let env_max_upload = parse_env("RECIPE_MEDIA_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            media_root: args.media_root.unwrap_or_else(|| PathBuf::from(env_root)),
            database_url: args.database_url.unwrap_or(env_db),
            accept_pattern: args.accept_pattern.unwrap_or(env_accept),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.reconcile {
            RunMode::Reconcile
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
