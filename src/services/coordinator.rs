//! src/services/coordinator.rs
//!
//! MediaCoordinator: runs sanitized uploads against the media store and
//! keeps each entity's media list in step with its directory.
//!
//! Ordering rule for every mutating operation: disk first, record second.
//! If the disk step fails the record is never touched. If the record save
//! fails after the disk step succeeded the files stay where they are and the
//! caller gets `MediaError::Inconsistent`; `reconcile` reports such entities.

use crate::{
    models::{
        entity::{EntityKind, MediaOwner, MediaPolicy},
        upload::{BatchSummary, SanitizedBatch, UploadCandidate},
    },
    services::{
        classifier,
        media_store::{MediaStore, MediaStoreError},
        repository::{EntityRepository, RepositoryError},
        sanitizer::Sanitizer,
    },
};
use axum::http::StatusCode;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{kind} `{id}` not found")]
    EntityNotFound { kind: EntityKind, id: String },
    #[error("{kind} `{id}` already has media, nothing to do")]
    Conflict { kind: EntityKind, id: String },
    /// The disk step finished but the record save failed. After attach the
    /// record misses the new files (orphans). After replace it still names
    /// the old files, which are gone (dangling references), and misses the
    /// new ones. `reconcile` reports both.
    #[error(
        "media for {kind} `{id}` changed on disk but the record could not be updated: {source}"
    )]
    Inconsistent {
        kind: EntityKind,
        id: String,
        source: RepositoryError,
    },
    #[error(transparent)]
    Store(#[from] MediaStoreError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl MediaError {
    pub fn status(&self) -> StatusCode {
        match self {
            MediaError::EntityNotFound { .. } => StatusCode::NOT_FOUND,
            MediaError::Conflict { .. } => StatusCode::CONFLICT,
            MediaError::Store(MediaStoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            MediaError::Store(MediaStoreError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            MediaError::Store(_) | MediaError::Repository(_) | MediaError::Inconsistent { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub type MediaResult<T> = Result<T, MediaError>;

/// What an operation hands back to the HTTP layer.
#[derive(Debug)]
pub enum MediaContext {
    Batch(BatchSummary),
    File {
        bytes: Bytes,
        content_type: &'static str,
        etag: String,
    },
}

#[derive(Debug)]
pub struct MediaResponse {
    pub status: StatusCode,
    pub message: String,
    pub context: Option<MediaContext>,
}

impl MediaResponse {
    fn new(status: StatusCode, message: impl Into<String>, context: Option<MediaContext>) -> Self {
        Self {
            status,
            message: message.into(),
            context,
        }
    }

    fn batch(status: StatusCode, message: impl Into<String>, batch: &SanitizedBatch) -> Self {
        Self::new(status, message, Some(MediaContext::Batch(batch.summary())))
    }

    pub fn summary(&self) -> Option<&BatchSummary> {
        match &self.context {
            Some(MediaContext::Batch(summary)) => Some(summary),
            _ => None,
        }
    }
}

/// One async mutex per (kind, id), so concurrent operations on the same
/// entity run one after another. Unused entries are pruned on acquire.
#[derive(Clone, Default)]
pub struct EntityLocks {
    inner: Arc<Mutex<HashMap<(EntityKind, String), Arc<AsyncMutex<()>>>>>,
}

impl EntityLocks {
    pub async fn acquire(&self, kind: EntityKind, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry((kind, id.to_string())).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct MediaCoordinator {
    repo: Arc<dyn EntityRepository>,
    store: MediaStore,
    sanitizer: Sanitizer,
    locks: EntityLocks,
}

impl MediaCoordinator {
    pub fn new(repo: Arc<dyn EntityRepository>, store: MediaStore, sanitizer: Sanitizer) -> Self {
        Self {
            repo,
            store,
            sanitizer,
            locks: EntityLocks::default(),
        }
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    pub fn repository(&self) -> &Arc<dyn EntityRepository> {
        &self.repo
    }

    /// Classify and name decoded candidates under the configured policy.
    pub async fn sanitize(&self, candidates: Vec<UploadCandidate>) -> SanitizedBatch {
        self.sanitizer.sanitize(candidates).await
    }

    /// Link newly cleared files to an entity.
    ///
    /// Additive for multi-media entities. A single-media entity that already
    /// has media conflicts, and only its first cleared file is kept.
    pub async fn attach(
        &self,
        kind: EntityKind,
        id: &str,
        mut batch: SanitizedBatch,
    ) -> MediaResult<MediaResponse> {
        let _guard = self.locks.acquire(kind, id).await;
        let mut owner = self.load_owner(kind, id).await?;

        let single = kind.media_policy() == MediaPolicy::Single;
        if owner.has_media() && (batch.cleared.is_empty() || single) {
            return Err(MediaError::Conflict {
                kind,
                id: id.to_string(),
            });
        }
        if let Some(response) = nothing_to_do(&batch) {
            return Ok(response);
        }
        if single {
            batch.limit_to_first();
        }

        let had_directory = owner.has_media();
        self.store.create_directory(kind, id).await?;
        if let Err(err) = self.store.write(kind, id, &batch.cleared).await {
            self.store.remove_files(kind, id, &batch.unique_names()).await;
            if !had_directory {
                if let Err(cleanup_err) = self.store.remove_directory(kind, id).await {
                    warn!("cleanup of {} `{}` directory failed: {}", kind, id, cleanup_err);
                }
            }
            return Err(err.into());
        }

        owner.union_media(batch.unique_names());
        self.persist(&owner).await?;

        info!(
            "attached {} file(s) to {} `{}` ({} rejected)",
            batch.cleared.len(),
            kind,
            id,
            batch.rejected.len()
        );
        Ok(MediaResponse::batch(StatusCode::CREATED, "media attached", &batch))
    }

    /// Overwrite an entity's media with the newly cleared files.
    ///
    /// The new files are staged in full before the old directory goes away.
    pub async fn replace(
        &self,
        kind: EntityKind,
        id: &str,
        mut batch: SanitizedBatch,
    ) -> MediaResult<MediaResponse> {
        let _guard = self.locks.acquire(kind, id).await;
        let mut owner = self.load_owner(kind, id).await?;

        if let Some(response) = nothing_to_do(&batch) {
            return Ok(response);
        }
        if kind.media_policy() == MediaPolicy::Single {
            batch.limit_to_first();
        }

        let staged = self.store.stage(kind, id, &batch.cleared).await?;
        self.store.commit_staged(staged).await?;

        owner.media = batch.unique_names();
        self.persist(&owner).await?;

        info!(
            "replaced media of {} `{}` with {} file(s) ({} rejected)",
            kind,
            id,
            batch.cleared.len(),
            batch.rejected.len()
        );
        Ok(MediaResponse::batch(StatusCode::OK, "media replaced", &batch))
    }

    /// Remove every media file of an entity and clear its list.
    pub async fn detach(&self, kind: EntityKind, id: &str) -> MediaResult<MediaResponse> {
        let _guard = self.locks.acquire(kind, id).await;
        let mut owner = self.load_owner(kind, id).await?;

        self.store.remove_directory(kind, id).await?;
        let removed = owner.media.len();
        owner.media.clear();
        self.persist(&owner).await?;

        info!("detached {} file(s) from {} `{}`", removed, kind, id);
        Ok(MediaResponse::new(StatusCode::OK, "media removed", None))
    }

    /// Fetch one stored file.
    ///
    /// The content type is sniffed from the stored bytes; the name's
    /// extension is only a fallback for buffers without a signature.
    pub async fn read(&self, kind: EntityKind, id: &str, name: &str) -> MediaResult<MediaResponse> {
        if !self.repo.exists(kind, id).await? {
            return Err(MediaError::EntityNotFound {
                kind,
                id: id.to_string(),
            });
        }

        let bytes = self.store.read(kind, id, name).await?;
        let content_type = classifier::classify(&bytes)
            .detected_type
            .unwrap_or_else(|| classifier::content_type_for_name(name));
        let etag = format!("{:x}", md5::compute(&bytes));

        Ok(MediaResponse::new(
            StatusCode::OK,
            "media found",
            Some(MediaContext::File {
                bytes,
                content_type,
                etag,
            }),
        ))
    }

    async fn load_owner(&self, kind: EntityKind, id: &str) -> MediaResult<MediaOwner> {
        self.repo
            .load(kind, id)
            .await?
            .ok_or_else(|| MediaError::EntityNotFound {
                kind,
                id: id.to_string(),
            })
    }

    async fn persist(&self, owner: &MediaOwner) -> MediaResult<()> {
        self.repo.save(owner).await.map_err(|source| {
            error!(
                "{} `{}` media list not saved after disk update: {}",
                owner.kind, owner.id, source
            );
            MediaError::Inconsistent {
                kind: owner.kind,
                id: owner.id.clone(),
                source,
            }
        })
    }
}

/// 204-style outcome when there is nothing to write.
fn nothing_to_do(batch: &SanitizedBatch) -> Option<MediaResponse> {
    if batch.is_empty() {
        return Some(MediaResponse::new(
            StatusCode::NO_CONTENT,
            "nothing to do",
            None,
        ));
    }
    if batch.cleared.is_empty() {
        return Some(MediaResponse::batch(
            StatusCode::NO_CONTENT,
            "no acceptable media, nothing to do",
            batch,
        ));
    }
    None
}
