//! src/services/repository.rs
//!
//! Entity repository: the document-store side of the media pipeline.
//! The coordinator only needs existence checks, loads and saves; the SQLite
//! implementation keeps each record's media list as a JSON array column.

use crate::models::entity::{EntityKind, MediaOwner};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{kind} `{id}` already exists")]
    AlreadyExists { kind: EntityKind, id: String },
    #[error("media column of {kind} `{id}` is not a JSON string array: {source}")]
    CorruptMedia {
        kind: EntityKind,
        id: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Access to the records that own media.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    async fn exists(&self, kind: EntityKind, id: &str) -> RepositoryResult<bool>;

    async fn load(&self, kind: EntityKind, id: &str) -> RepositoryResult<Option<MediaOwner>>;

    /// Persist the record's media list. The record must already exist.
    async fn save(&self, owner: &MediaOwner) -> RepositoryResult<()>;

    /// Ids of every record of `kind`, ordered.
    async fn list_ids(&self, kind: EntityKind) -> RepositoryResult<Vec<String>>;
}

#[derive(FromRow)]
struct OwnerRow {
    id: String,
    label: String,
    media: String,
    created_at: DateTime<Utc>,
}

fn label_column(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Recipe => "title",
        EntityKind::User => "username",
    }
}

#[derive(Clone)]
pub struct SqliteEntityRepository {
    pub db: Arc<SqlitePool>,
}

impl SqliteEntityRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new record. Entity creation belongs to the catalog layer;
    /// this exists for seeding and tests.
    pub async fn insert(&self, owner: &MediaOwner) -> RepositoryResult<()> {
        let sql = format!(
            "INSERT INTO {} (id, {}, media, created_at) VALUES (?, ?, ?, ?)",
            owner.kind.table(),
            label_column(owner.kind)
        );
        let result = sqlx::query(&sql)
            .bind(&owner.id)
            .bind(&owner.label)
            .bind(serde_json::to_string(&owner.media)?)
            .bind(owner.created_at)
            .execute(&*self.db)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(RepositoryError::AlreadyExists {
                kind: owner.kind,
                id: owner.id.clone(),
            }),
            Err(err) => Err(RepositoryError::Sqlx(err)),
        }
    }
}

#[async_trait]
impl EntityRepository for SqliteEntityRepository {
    async fn exists(&self, kind: EntityKind, id: &str) -> RepositoryResult<bool> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", kind.table());
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(id)
            .fetch_one(&*self.db)
            .await?;
        Ok(count > 0)
    }

    async fn load(&self, kind: EntityKind, id: &str) -> RepositoryResult<Option<MediaOwner>> {
        let sql = format!(
            "SELECT id, {} AS label, media, created_at FROM {} WHERE id = ?",
            label_column(kind),
            kind.table()
        );
        let Some(row) = sqlx::query_as::<_, OwnerRow>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
        else {
            return Ok(None);
        };

        let media: Vec<String> =
            serde_json::from_str(&row.media).map_err(|source| RepositoryError::CorruptMedia {
                kind,
                id: row.id.clone(),
                source,
            })?;

        Ok(Some(MediaOwner {
            kind,
            id: row.id,
            label: row.label,
            media,
            created_at: row.created_at,
        }))
    }

    async fn save(&self, owner: &MediaOwner) -> RepositoryResult<()> {
        let sql = format!("UPDATE {} SET media = ? WHERE id = ?", owner.kind.table());
        let result = sqlx::query(&sql)
            .bind(serde_json::to_string(&owner.media)?)
            .bind(&owner.id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Sqlx(sqlx::Error::RowNotFound));
        }
        debug!(
            "saved {} media reference(s) for {} `{}`",
            owner.media.len(),
            owner.kind,
            owner.id
        );
        Ok(())
    }

    async fn list_ids(&self, kind: EntityKind) -> RepositoryResult<Vec<String>> {
        let sql = format!("SELECT id FROM {} ORDER BY id", kind.table());
        Ok(sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&*self.db)
            .await?)
    }
}

/// Apply the embedded schema statement by statement.
pub async fn run_migrations(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = INIT_MIGRATION
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
