//! Shared state handed to every handler.

use crate::services::{coordinator::MediaCoordinator, media_store::MediaStore};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Pool behind the entity repository; also probed by `/readyz`.
    pub db: Arc<SqlitePool>,

    pub coordinator: MediaCoordinator,
}

impl AppState {
    pub fn new(db: Arc<SqlitePool>, coordinator: MediaCoordinator) -> Self {
        Self { db, coordinator }
    }

    pub fn store(&self) -> &MediaStore {
        self.coordinator.store()
    }
}
