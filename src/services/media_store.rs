//! src/services/media_store.rs
//!
//! MediaStore: on-disk media directories, one per entity, laid out as
//! `root/{kind}/{entity_id}/{unique_name}`. There are no nested directories
//! beneath an entity directory.
//!
//! Files are written to a temporary name, fsynced and renamed into place so a
//! reader never sees a half-written file. Replacing a directory goes through a
//! staging directory that is swapped in only after every file landed.

use crate::models::{entity::EntityKind, upload::ClearedFile};
use bytes::Bytes;
use futures::future::join_all;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum MediaStoreError {
    #[error("invalid path segment `{0}`")]
    InvalidName(String),
    #[error("media `{name}` not found for {kind} `{id}`")]
    NotFound {
        kind: EntityKind,
        id: String,
        name: String,
    },
    #[error("failed to write {failed:?}: {source}")]
    PartialWrite {
        failed: Vec<String>,
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type MediaStoreResult<T> = Result<T, MediaStoreError>;

/// A fully written directory waiting to replace an entity's media directory.
#[derive(Debug)]
pub struct StagedDirectory {
    kind: EntityKind,
    id: String,
    path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct MediaStore {
    /// Media root; every entity directory lives below it.
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject anything that could escape or hide inside the media root.
    fn ensure_segment_safe(segment: &str) -> MediaStoreResult<()> {
        let invalid = segment.is_empty()
            || segment.len() > MAX_NAME_LEN
            || segment.starts_with('.')
            || segment.contains("..")
            || segment
                .chars()
                .any(|c| c == '/' || c == '\\' || c.is_control());
        if invalid {
            return Err(MediaStoreError::InvalidName(segment.to_string()));
        }
        Ok(())
    }

    fn kind_root(&self, kind: EntityKind) -> PathBuf {
        self.root.join(kind.as_segment())
    }

    /// Directory holding one entity's media. Does not check existence.
    pub fn entity_dir(&self, kind: EntityKind, id: &str) -> MediaStoreResult<PathBuf> {
        Self::ensure_segment_safe(id)?;
        Ok(self.kind_root(kind).join(id))
    }

    fn media_path(&self, kind: EntityKind, id: &str, name: &str) -> MediaStoreResult<PathBuf> {
        Self::ensure_segment_safe(name)?;
        Ok(self.entity_dir(kind, id)?.join(name))
    }

    /// Create the entity's directory. Succeeds if it already exists.
    pub async fn create_directory(&self, kind: EntityKind, id: &str) -> MediaStoreResult<()> {
        let dir = self.entity_dir(kind, id)?;
        fs::create_dir_all(&dir).await?;
        debug!("ensured media directory {}", dir.display());
        Ok(())
    }

    /// Remove the entity's directory and everything in it. Succeeds if absent.
    pub async fn remove_directory(&self, kind: EntityKind, id: &str) -> MediaStoreResult<()> {
        let dir = self.entity_dir(kind, id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(_) => {
                debug!("removed media directory {}", dir.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(MediaStoreError::Io(err)),
        }
    }

    /// Write cleared files into an existing entity directory.
    ///
    /// All files are attempted concurrently; any failures are reported
    /// together once every attempt finished.
    pub async fn write(
        &self,
        kind: EntityKind,
        id: &str,
        files: &[ClearedFile],
    ) -> MediaStoreResult<()> {
        let dir = self.entity_dir(kind, id)?;
        write_all_into(&dir, files).await
    }

    /// Read a stored file back.
    pub async fn read(&self, kind: EntityKind, id: &str, name: &str) -> MediaStoreResult<Bytes> {
        let path = self.media_path(kind, id, name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(MediaStoreError::NotFound {
                kind,
                id: id.to_string(),
                name: name.to_string(),
            }),
            Err(err) => Err(MediaStoreError::Io(err)),
        }
    }

    /// Names of the files currently stored for an entity, sorted.
    /// A missing directory has no entries.
    pub async fn entries(&self, kind: EntityKind, id: &str) -> MediaStoreResult<Vec<String>> {
        let dir = self.entity_dir(kind, id)?;
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(MediaStoreError::Io(err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Temp files from in-flight writes are not entries.
            if !name.starts_with('.') && entry.file_type().await?.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Every entity id that currently has a directory under `kind`.
    pub async fn entity_ids(&self, kind: EntityKind) -> MediaStoreResult<Vec<String>> {
        let mut reader = match fs::read_dir(self.kind_root(kind)).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(MediaStoreError::Io(err)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && entry.file_type().await?.is_dir() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Best-effort removal of individual files, used to roll back a failed write.
    pub async fn remove_files(&self, kind: EntityKind, id: &str, names: &[String]) {
        for name in names {
            let Ok(path) = self.media_path(kind, id, name) else {
                continue;
            };
            if let Err(err) = fs::remove_file(&path).await {
                if err.kind() != ErrorKind::NotFound {
                    warn!("could not remove {}: {}", path.display(), err);
                }
            }
        }
    }

    /// Write files into a fresh hidden directory next to the entity's one.
    ///
    /// On failure the staging directory is removed and the entity's current
    /// directory is untouched.
    pub async fn stage(
        &self,
        kind: EntityKind,
        id: &str,
        files: &[ClearedFile],
    ) -> MediaStoreResult<StagedDirectory> {
        Self::ensure_segment_safe(id)?;
        let path = self
            .kind_root(kind)
            .join(format!(".staging-{}-{}", id, Uuid::new_v4()));
        fs::create_dir_all(&path).await?;

        let staged = StagedDirectory {
            kind,
            id: id.to_string(),
            path,
        };
        if let Err(err) = write_all_into(&staged.path, files).await {
            self.discard_staged(staged).await;
            return Err(err);
        }
        Ok(staged)
    }

    /// Swap a staged directory in as the entity's media directory.
    ///
    /// The previous directory is moved aside first and restored if the swap
    /// fails, so the entity always has either its old or its new directory.
    pub async fn commit_staged(&self, staged: StagedDirectory) -> MediaStoreResult<()> {
        let target = self.entity_dir(staged.kind, &staged.id)?;
        let aside = self
            .kind_root(staged.kind)
            .join(format!(".replaced-{}-{}", staged.id, Uuid::new_v4()));

        let had_previous = match fs::rename(&target, &aside).await {
            Ok(_) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => {
                self.discard_staged(staged).await;
                return Err(MediaStoreError::Io(err));
            }
        };

        if let Err(err) = fs::rename(&staged.path, &target).await {
            if had_previous {
                if let Err(restore_err) = fs::rename(&aside, &target).await {
                    warn!(
                        "could not restore {} after failed swap: {}",
                        target.display(),
                        restore_err
                    );
                }
            }
            self.discard_staged(staged).await;
            return Err(MediaStoreError::Io(err));
        }

        if had_previous {
            if let Err(err) = fs::remove_dir_all(&aside).await {
                warn!("could not remove replaced directory {}: {}", aside.display(), err);
            }
        }
        debug!("swapped in new media directory {}", target.display());
        Ok(())
    }

    /// Remove a staged directory that will not be committed.
    pub async fn discard_staged(&self, staged: StagedDirectory) {
        if let Err(err) = fs::remove_dir_all(&staged.path).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    "could not remove staging directory {}: {}",
                    staged.path.display(),
                    err
                );
            }
        }
    }
}

async fn write_all_into(dir: &Path, files: &[ClearedFile]) -> MediaStoreResult<()> {
    let attempts = files.iter().map(|file| async move {
        write_file(dir, &file.unique_name, &file.bytes)
            .await
            .map_err(|err| (file.unique_name.clone(), err))
    });

    let mut failed = Vec::new();
    let mut first_error = None;
    for result in join_all(attempts).await {
        if let Err((name, err)) = result {
            warn!("writing {} into {} failed: {}", name, dir.display(), err);
            failed.push(name);
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }

    match first_error {
        None => Ok(()),
        Some(source) => Err(MediaStoreError::PartialWrite { failed, source }),
    }
}

/// Write one file via temp file + fsync + rename.
async fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<()> {
    MediaStore::ensure_segment_safe(name)
        .map_err(|err| io::Error::new(ErrorKind::InvalidInput, err.to_string()))?;

    let final_path = dir.join(name);
    let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
    let mut file = File::create(&tmp_path).await?;

    let written: io::Result<()> = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, &final_path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    debug!("stored {} ({} bytes)", final_path.display(), bytes.len());
    Ok(())
}
