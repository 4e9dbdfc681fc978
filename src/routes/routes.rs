//! Defines routes for entity media operations.
//!
//! ## Structure
//! - **Media collection of an entity** (`kind` is `recipes` or `users`)
//!   - `POST   /{kind}/{id}/media` attach uploaded images
//!   - `PUT    /{kind}/{id}/media` replace all media
//!   - `DELETE /{kind}/{id}/media` remove all media
//!
//! - **Single stored file**
//!   - `GET    /{kind}/{id}/media/{name}` serve raw bytes
//!
//! - **Probes**: `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        media_handlers::{attach_media, detach_media, get_media, replace_media},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router for all media routes.
///
/// Upload bodies larger than `max_upload_bytes` are refused with 413 before
/// any decoding happens.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/{kind}/{id}/media",
            post(attach_media).put(replace_media).delete(detach_media),
        )
        .route("/{kind}/{id}/media/{name}", get(get_media))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
