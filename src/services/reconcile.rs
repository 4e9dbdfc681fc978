//! Offline consistency check between media directories and media lists.
//!
//! Nothing here repairs anything; divergences are reported so an operator
//! can decide which side is right.
//!
//! A failed record save after attach shows up as orphaned files; after
//! replace it shows up as dangling references to the old files plus the new
//! files as orphans.

use crate::{
    models::entity::EntityKind,
    services::{
        media_store::{MediaStore, MediaStoreError},
        repository::{EntityRepository, RepositoryError},
    },
};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] MediaStoreError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// One entity whose directory and media list disagree.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub kind: EntityKind,
    pub id: String,
    /// On disk but not referenced.
    pub orphaned_files: Vec<String>,
    /// Referenced but missing on disk.
    pub dangling_refs: Vec<String>,
    /// Directory exists but no record of this kind does.
    pub missing_entity: bool,
}

/// Compare every record and every entity directory.
pub async fn reconcile(
    repo: &dyn EntityRepository,
    store: &MediaStore,
) -> Result<Vec<Divergence>, ReconcileError> {
    let mut divergences = Vec::new();

    for kind in EntityKind::ALL {
        let record_ids = repo.list_ids(kind).await?;
        let known: BTreeSet<&str> = record_ids.iter().map(String::as_str).collect();

        for id in &record_ids {
            let Some(owner) = repo.load(kind, id).await? else {
                continue;
            };
            let on_disk: BTreeSet<String> = match store.entries(kind, id).await {
                Ok(entries) => entries.into_iter().collect(),
                // Ids the store cannot represent can't have a directory either.
                Err(MediaStoreError::InvalidName(_)) => BTreeSet::new(),
                Err(err) => return Err(err.into()),
            };
            let referenced: BTreeSet<String> = owner.media.into_iter().collect();

            let orphaned_files: Vec<String> = on_disk.difference(&referenced).cloned().collect();
            let dangling_refs: Vec<String> = referenced.difference(&on_disk).cloned().collect();
            if !orphaned_files.is_empty() || !dangling_refs.is_empty() {
                divergences.push(Divergence {
                    kind,
                    id: id.clone(),
                    orphaned_files,
                    dangling_refs,
                    missing_entity: false,
                });
            }
        }

        for id in store.entity_ids(kind).await? {
            if known.contains(id.as_str()) {
                continue;
            }
            let orphaned_files = store.entries(kind, &id).await?;
            divergences.push(Divergence {
                kind,
                id,
                orphaned_files,
                dangling_refs: Vec::new(),
                missing_entity: true,
            });
        }
    }

    Ok(divergences)
}
