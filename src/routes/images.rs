/*
 * Image read endpoints: metadata lookup, binary data with conditional HTTP semantics, and the share redirect.
 */

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::routes::whatsapp_share_url;
use crate::services::storage_service::StorageService;
use crate::utils::error::{AppError, Result};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ImageInfoResponse {
    #[serde(rename = "imageId")]
    pub image_id: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    pub metadata: crate::models::ImageRecord,
}

/// GET /api/images/:id
pub async fn get_image_info(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<Json<ImageInfoResponse>> {
    let record = state
        .storage
        .get_metadata(&image_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("image {}", image_id)))?;

    let image_url = state.storage.get_image_url(&image_id, false, None).await?;
    state.telemetry.track_store_query();

    Ok(Json(ImageInfoResponse {
        image_id: record.id.clone(),
        image_url,
        metadata: record,
    }))
}

/// GET /api/images/:id/data
/// Serves the bytes with immutable cache headers, answering 304 when the
/// client already holds the current etag.
pub async fn get_image_data(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let (_, blob) = state.storage.get_image_with_metadata(&image_id).await?;
    state.telemetry.track_blob_read();

    let cache_headers = StorageService::generate_cache_headers(&blob);
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok());

    if StorageService::check_etag_match(if_none_match, &blob.etag) {
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        response.headers_mut().extend(cache_headers);
        return Ok(response);
    }

    let mut response = (StatusCode::OK, blob.bytes).into_response();
    response.headers_mut().extend(cache_headers);
    Ok(response)
}

/// GET /api/images/:id/share -> 302 to the WhatsApp share URL
pub async fn share_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<Response> {
    let record = state
        .storage
        .get_metadata(&image_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("image {}", image_id)))?;

    let image_url = state.storage.get_image_url(&image_id, false, None).await?;
    let share_url = whatsapp_share_url(&record.verse_text, &record.verse_reference, &image_url);

    let mut response = StatusCode::FOUND.into_response();
    if let Ok(value) = header::HeaderValue::from_str(&share_url) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    Ok(response)
}
