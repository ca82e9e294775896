/*
 * Daily verse endpoints: the current rotation image, verse search, and the development-only override.
 */

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::models::Verse;
use crate::utils::error::{AppError, Result};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DailyVerseResponse {
    #[serde(rename = "imageId")]
    pub image_id: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    #[serde(rename = "verseReference")]
    pub verse_reference: String,
    #[serde(rename = "verseText")]
    pub verse_text: String,
    #[serde(rename = "generatedAt")]
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

/// GET /api/daily-verse
/// Resolves the current daily-verse pointer to its image metadata.
pub async fn get_daily_verse(State(state): State<AppState>) -> Result<Json<DailyVerseResponse>> {
    let image_id = state
        .storage
        .cache()
        .get_daily_verse_image_id()
        .await
        .ok_or_else(|| AppError::not_found("daily verse"))?;

    let record = state
        .storage
        .get_metadata(&image_id)
        .await?
        .ok_or_else(|| AppError::not_found("daily verse"))?;

    let image_url = state.storage.get_image_url(&record.id, false, None).await?;

    Ok(Json(DailyVerseResponse {
        image_id: record.id.clone(),
        image_url,
        verse_reference: record.verse_reference,
        verse_text: record.verse_text,
        generated_at: record.generated_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<Verse>,
    pub count: usize,
}

/// GET /api/verses/search?q=
pub async fn search_verses(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>> {
    let results = state.verse_resolver.search_verses(&query.q).await?;
    let count = results.len();
    Ok(Json(SearchResponse { results, count }))
}

#[derive(Debug, Deserialize)]
pub struct SetDailyVerseRequest {
    #[serde(rename = "imageId")]
    pub image_id: String,
}

/// POST /internal/set-daily-verse (development only; never routed elsewhere)
pub async fn set_daily_verse(
    State(state): State<AppState>,
    Json(body): Json<SetDailyVerseRequest>,
) -> Result<Json<serde_json::Value>> {
    let record = state
        .storage
        .get_metadata(&body.image_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("image {}", body.image_id)))?;

    state
        .storage
        .cache()
        .set_daily_verse_image_id(&record.id)
        .await;

    Ok(Json(serde_json::json!({ "success": true, "imageId": record.id })))
}
