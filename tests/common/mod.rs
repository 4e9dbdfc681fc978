//! Shared helpers for HTTP-level tests: an app wired exactly like `main`,
//! backed by an in-memory database and a temporary media root.

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use http_body_util::BodyExt;
use recipe_media::{
    models::entity::{EntityKind, MediaOwner},
    routes::routes::routes,
    services::{
        coordinator::MediaCoordinator,
        media_store::MediaStore,
        repository::{SqliteEntityRepository, run_migrations},
        sanitizer::{AcceptPolicy, Sanitizer},
    },
    state::AppState,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "----RecipeMediaTestBoundary";

pub const PNG: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R',
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00,
];

pub const JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01,
    0x00, 0x01, 0x00, 0x00, 0xFF, 0xD9,
];

pub const TEXT: &[u8] = b"2 eggs\n1 cup flour\n";

pub struct TestApp {
    pub router: Router,
    pub repo: SqliteEntityRepository,
    pub media_root: TempDir,
}

/// Build the router with one recipe (`r1`) and one user (`u1`) seeded.
pub async fn build_test_app() -> TestApp {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    let db = Arc::new(pool);

    let repo = SqliteEntityRepository::new(db.clone());
    repo.insert(&MediaOwner::new(EntityKind::Recipe, "r1", "Focaccia"))
        .await
        .unwrap();
    repo.insert(&MediaOwner::new(EntityKind::User, "u1", "grace"))
        .await
        .unwrap();

    let media_root = tempfile::tempdir().unwrap();
    let coordinator = MediaCoordinator::new(
        Arc::new(repo.clone()),
        MediaStore::new(media_root.path()),
        Sanitizer::new(AcceptPolicy::new("image/(jpeg|png)").unwrap()),
    );
    let router = routes(1024 * 1024).with_state(AppState::new(db, coordinator));

    TestApp {
        router,
        repo,
        media_root,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn media(&self, kind: EntityKind, id: &str) -> Vec<String> {
        use recipe_media::services::repository::EntityRepository;
        self.repo.load(kind, id).await.unwrap().unwrap().media
    }

    /// Sorted file names in an entity's media directory.
    pub fn files_on_disk(&self, segment: &str, id: &str) -> Vec<String> {
        let dir = self.media_root.path().join(segment).join(id);
        let Ok(reader) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = reader
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// A multipart body with one file part per `(filename, bytes)` pair plus a
/// plain text field in front.
pub fn multipart_body(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"caption\"\r\n\r\nfresh out of the oven\r\n"
        )
        .as_bytes(),
    );
    for (name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"{name}\"\r\n\
                 Content-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload(method: &str, uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

pub fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
