//! Image delivery and upload handlers.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::images::service::IMMUTABLE_CACHE_CONTROL;
use crate::images::{ImageQuery, TransformDescriptor};
use crate::state::AppState;
use crate::storage::StoredObject;

fn object_response(object: StoredObject) -> Response {
    let cache_control = object
        .cache_control
        .unwrap_or_else(|| IMMUTABLE_CACHE_CONTROL.to_string());
    (
        [
            (header::CONTENT_TYPE, object.content_type),
            (header::CACHE_CONTROL, cache_control),
        ],
        object.bytes,
    )
        .into_response()
}

/// `GET /images/{*path}`
///
/// Derived variant of an original, or a video verbatim with `type=video`.
///
/// WebP (the default `fm`) is always encoded lossless, so `q` has no effect
/// on WebP pixels; it still selects a separate cached variant. Send
/// `fm=jpeg` for quality-controlled lossy output. Requests whose resulting
/// size would exceed 4096 pixels on a side (a thin original with
/// `fit=outside`, say) are rejected with 400.
#[instrument(skip(state, query))]
pub async fn get_image(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ImageQuery>,
) -> Result<Response> {
    let object = if query.is_video() {
        state.images().video(&path).await?
    } else {
        let descriptor = TransformDescriptor::from_query(&query)?;
        state.images().derived(&path, descriptor).await?
    };
    Ok(object_response(object))
}

/// Body of a successful upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
    pub path: String,
}

/// `POST /api/images/upload`
///
/// Multipart form with a single `file` field.
#[instrument(skip_all)]
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;

        let asset = state
            .images()
            .upload(&file_name, &content_type, bytes.to_vec())
            .await?;

        return Ok(Json(UploadResponse {
            success: true,
            url: asset.url(&state.config().base_url),
            path: asset.path,
        }));
    }

    Err(AppError::BadRequest("missing file field".to_string()))
}
