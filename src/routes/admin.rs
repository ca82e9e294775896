/*
 * Admin moderation endpoints, guarded by the bearer admin token.
 * Missing credentials answer 401; wrong credentials answer 403.
 */

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::models::{ModerationDecision, ModerationQueueEntry};
use crate::routes::bearer_subject;
use crate::utils::error::{AppError, Result};
use crate::AppState;

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let token = bearer_subject(headers)
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

    match &state.config.admin_token {
        Some(expected) if expected == &token => Ok(()),
        _ => Err(AppError::Forbidden("invalid admin token".to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct ModerateRequest {
    #[serde(rename = "imageId")]
    pub image_id: Option<String>,
    pub action: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModerateResponse {
    pub success: bool,
}

/// POST /api/admin/moderate
pub async fn moderate_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<ModerateRequest>, JsonRejection>,
) -> Result<Json<ModerateResponse>> {
    require_admin(&state, &headers)?;

    let Json(body) = payload
        .map_err(|rejection| AppError::invalid_request(format!("Malformed JSON body: {}", rejection)))?;

    let image_id = body
        .image_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::MissingRequiredField("imageId".to_string()))?;
    let action = body
        .action
        .as_deref()
        .ok_or_else(|| AppError::MissingRequiredField("action".to_string()))?;
    let action = ModerationDecision::parse(action)?;

    if let Some(reason) = body.reason.as_deref().filter(|r| !r.trim().is_empty()) {
        // An explicit reason lands in the queue as its own entry before the
        // decision closes the oldest one.
        state.moderation.flag_for_review(image_id, reason).await?;
    }

    state
        .moderation
        .moderate_content(image_id, action, Some("admin"))
        .await?;

    Ok(Json(ModerateResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub entries: Vec<ModerationQueueEntry>,
}

/// GET /api/admin/moderation-queue?limit=
pub async fn moderation_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<QueueQuery>,
) -> Result<Json<QueueResponse>> {
    require_admin(&state, &headers)?;

    let limit = query.limit.unwrap_or(20).min(100);
    let entries = state.moderation.get_pending_reviews(limit).await?;
    Ok(Json(QueueResponse { entries }))
}
