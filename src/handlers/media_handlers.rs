//! HTTP handlers for entity media.
//!
//! Request bodies are buffered in full (bounded by the router's body limit)
//! and decoded by our own multipart decoder; nothing is written to disk until
//! every candidate has been classified.

use crate::{
    errors::AppError,
    models::{entity::EntityKind, upload::UploadCandidate},
    services::{
        coordinator::{MediaContext, MediaResponse},
        multipart,
    },
    state::AppState,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

/// Rejected filenames on a 204, which cannot carry a body.
pub const REJECTED_HEADER: HeaderName = HeaderName::from_static("x-media-rejected");

/// `POST /{kind}/{id}/media`: attach uploaded images.
pub async fn attach_media(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<MediaResponse, AppError> {
    let kind = parse_kind(&kind)?;
    let batch = state
        .coordinator
        .sanitize(extract_candidates(&headers, &body))
        .await;
    Ok(state.coordinator.attach(kind, &id, batch).await?)
}

/// `PUT /{kind}/{id}/media`: replace all media with the uploaded images.
pub async fn replace_media(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<MediaResponse, AppError> {
    let kind = parse_kind(&kind)?;
    let batch = state
        .coordinator
        .sanitize(extract_candidates(&headers, &body))
        .await;
    Ok(state.coordinator.replace(kind, &id, batch).await?)
}

/// `DELETE /{kind}/{id}/media`: remove all media.
pub async fn detach_media(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<MediaResponse, AppError> {
    let kind = parse_kind(&kind)?;
    Ok(state.coordinator.detach(kind, &id).await?)
}

/// `GET /{kind}/{id}/media/{name}`: serve one stored file.
pub async fn get_media(
    State(state): State<AppState>,
    Path((kind, id, name)): Path<(String, String, String)>,
) -> Result<MediaResponse, AppError> {
    let kind = parse_kind(&kind)?;
    Ok(state.coordinator.read(kind, &id, &name).await?)
}

fn parse_kind(segment: &str) -> Result<EntityKind, AppError> {
    segment.parse().map_err(AppError::not_found)
}

/// Decode file candidates, or nothing when the request carries no body.
///
/// A missing or zero `Content-Length`, a non-multipart content type, or a
/// missing boundary all mean "nothing submitted".
fn extract_candidates(headers: &HeaderMap, body: &Bytes) -> Vec<UploadCandidate> {
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    if content_length == 0 || body.is_empty() {
        debug!("request has no body, skipping multipart decoding");
        return Vec::new();
    }

    let Some(boundary) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(multipart::boundary_from_content_type)
    else {
        debug!("request is not multipart/form-data with a boundary");
        return Vec::new();
    };

    multipart::decode(body, &boundary)
}

impl IntoResponse for MediaResponse {
    fn into_response(self) -> Response {
        let status = self.status;
        match self.context {
            Some(MediaContext::File {
                bytes,
                content_type,
                etag,
            }) => {
                let length = bytes.len();
                let mut response = Response::new(Body::from(bytes));
                *response.status_mut() = status;
                let headers = response.headers_mut();
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
                if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
                    headers.insert(header::ETAG, value);
                }
                response
            }
            Some(MediaContext::Batch(summary)) if status == StatusCode::NO_CONTENT => {
                let mut response = StatusCode::NO_CONTENT.into_response();
                if !summary.rejected.is_empty() {
                    let encoded = serde_json::to_string(&summary.rejected).unwrap_or_default();
                    if let Ok(value) = HeaderValue::from_bytes(encoded.as_bytes()) {
                        response.headers_mut().insert(REJECTED_HEADER, value);
                    }
                }
                response
            }
            Some(MediaContext::Batch(summary)) => (
                status,
                Json(json!({
                    "status": status.as_u16(),
                    "message": self.message,
                    "cleared": summary.cleared,
                    "rejected": summary.rejected,
                })),
            )
                .into_response(),
            None if status == StatusCode::NO_CONTENT => StatusCode::NO_CONTENT.into_response(),
            None => (
                status,
                Json(json!({
                    "status": status.as_u16(),
                    "message": self.message,
                })),
            )
                .into_response(),
        }
    }
}
