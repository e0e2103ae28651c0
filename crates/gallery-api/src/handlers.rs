//! Route handlers for the local gallery API.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use gallery_core::normalizer::NormalizeContext;
use gallery_core::types::GalleryImage;
use gallery_storage::store::ImportSummary;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ImageParams {
    pub platform: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImportParams {
    /// Recorded as `sourceURL` on payloads that carry none.
    pub source: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub image_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImagesResponse {
    pub count: usize,
    pub images: Vec<GalleryImage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: usize,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let image_count = state.store.count().await?;
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        image_count,
    }))
}

/// GET /images - newest first, optionally limited to one platform.
pub async fn list_images(
    State(state): State<AppState>,
    Query(params): Query<ImageParams>,
) -> Result<Json<ImagesResponse>, ApiError> {
    let images = match params.platform.as_deref().map(str::trim) {
        Some(platform) if !platform.is_empty() => {
            state.store.get_images_by_platform(platform).await?
        }
        _ => state.store.get_all_images().await?,
    };
    Ok(Json(ImagesResponse {
        count: images.len(),
        images,
    }))
}

/// GET /images/{id}
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GalleryImage>, ApiError> {
    state
        .store
        .get_image(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Image {} not found", id)))
}

/// DELETE /images/{id}
pub async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    if !state.store.delete_image(&id).await? {
        return Err(ApiError::NotFound(format!("Image {} not found", id)));
    }
    info!(id = %id, "Image deleted");
    Ok(Json(DeleteResponse { deleted: 1 }))
}

/// DELETE /images
pub async fn clear_images(State(state): State<AppState>) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = state.store.clear_images().await?;
    Ok(Json(DeleteResponse { deleted }))
}

/// GET /export - the full record set as a JSON array.
pub async fn export_images(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.store.export_to_json().await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

/// POST /import - bulk import a JSON array of raw payloads.
pub async fn import_images(
    State(state): State<AppState>,
    Query(params): Query<ImportParams>,
    body: String,
) -> Result<Json<ImportSummary>, ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError::BadRequest("Request body is empty".to_string()));
    }
    let ctx = NormalizeContext::new(params.source.unwrap_or_default());
    let summary = state.store.import_from_json(&body, &ctx).await?;
    info!(
        received = summary.received,
        accepted = summary.accepted,
        stored = summary.stored,
        "Bulk import via API"
    );
    Ok(Json(summary))
}
