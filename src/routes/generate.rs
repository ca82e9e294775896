/*
 * POST /api/generate: the full generation pipeline.
 * received -> validated -> rate-checked -> idempotency -> verse -> prompt -> model -> moderation gate -> persist -> respond.
 * Side effects up to a failed step are kept; the error envelope always carries the request id.
 */

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::models::{ImageRecord, ModerationStatus, SaveImageOptions, StylePreset};
use crate::routes::{bearer_subject, request_identity, whatsapp_share_url};
use crate::services::model_client::GenerationTask;
use crate::services::moderation_service::ContentMetadata;
use crate::telemetry::RateLimitEvent;
use crate::utils::error::{AppError, Result};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(rename = "verseReference")]
    pub verse_reference: Option<String>,
    #[serde(rename = "verseText")]
    pub verse_text: Option<String>,
    #[serde(rename = "stylePreset")]
    pub style_preset: Option<String>,
    #[serde(rename = "customPrompt")]
    pub custom_prompt: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    #[serde(rename = "imageId")]
    pub image_id: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    #[serde(rename = "whatsappShareUrl")]
    pub whatsapp_share_url: String,
    #[serde(rename = "verseReference")]
    pub verse_reference: String,
    #[serde(rename = "verseText")]
    pub verse_text: String,
}

pub async fn generate_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();

    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            let request_id = Uuid::new_v4().to_string();
            let err = AppError::invalid_request(format!("Malformed JSON body: {}", rejection));
            state.telemetry.record_operation(
                "generate",
                started.elapsed().as_millis() as u64,
                "invalid_request",
                &request_id,
                None,
            );
            return err.into_response_with_id(&request_id);
        }
    };

    let request_id = body
        .request_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match run_pipeline(&state, &headers, &body, &request_id, started).await {
        Ok(response) => {
            state.telemetry.record_operation(
                "generate",
                started.elapsed().as_millis() as u64,
                "success",
                &request_id,
                Some(serde_json::json!({ "imageId": response.image_id })),
            );
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => {
            state.telemetry.record_operation(
                "generate",
                started.elapsed().as_millis() as u64,
                err.code(),
                &request_id,
                None,
            );
            err.into_response_with_id(&request_id)
        }
    }
}

async fn run_pipeline(
    state: &AppState,
    headers: &HeaderMap,
    body: &GenerateRequest,
    request_id: &str,
    _started: Instant,
) -> Result<GenerateResponse> {
    // Validation accumulates every field error before failing.
    let report = state.validator.validate_generation_request(
        body.verse_reference.as_deref(),
        body.style_preset.as_deref(),
        body.custom_prompt.as_deref(),
    );
    if !report.is_valid() {
        return Err(validation_error(&report));
    }

    let verse_reference = body
        .verse_reference
        .as_deref()
        .ok_or_else(|| AppError::MissingRequiredField("verseReference".to_string()))?;

    // Rate limiting, keyed by authenticated subject or client IP.
    let (identity, tier) = request_identity(headers);
    let user_id = bearer_subject(headers);
    let decision = state.rate_coordinator.check(&identity, tier).await?;

    let (tier_name, limit) = match tier {
        crate::services::Tier::Anonymous => ("anonymous", state.config.rate_limit_anonymous),
        crate::services::Tier::Authenticated => {
            ("authenticated", state.config.rate_limit_authenticated)
        }
    };
    state.telemetry.record_rate_limit_event(RateLimitEvent {
        timestamp: Utc::now(),
        identifier: identity.clone(),
        user_id: user_id.clone(),
        tier: tier_name.to_string(),
        limit_exceeded: !decision.allowed,
        request_count: limit.saturating_sub(decision.remaining),
        limit,
        reset_at: decision.reset_at,
    });

    if !decision.allowed {
        return Err(AppError::RateLimitExceeded {
            message: "Rate limit exceeded. Please try again later.".to_string(),
            retry_after: decision.retry_after_secs(),
        });
    }

    // Idempotency: a previously stored artefact under this request id wins,
    // and the model is not re-invoked.
    if let Some(client_request_id) = &body.request_id {
        if let Some(existing) = state.storage.get_metadata(client_request_id).await? {
            info!(request_id = %client_request_id, "Idempotency hit, returning prior artefact");
            return build_response(state, &existing).await;
        }
    }

    // Verse resolution; a caller-supplied verse text covers references the
    // service has no text for.
    let (verse_reference, verse_text) = match state.verse_resolver.get_verse(verse_reference).await
    {
        Ok(verse) => (verse.reference, verse.text),
        Err(err) => match (&err, &body.verse_text) {
            (AppError::NotFound(_), Some(text)) if !text.trim().is_empty() => {
                let parsed = state.verse_resolver.parse_reference(verse_reference)?;
                (parsed.canonical(), text.trim().to_string())
            }
            _ => return Err(err),
        },
    };

    // Prompt composition, with sanitised free-text guidance appended.
    let style = match body.style_preset.as_deref() {
        Some(style) if !style.trim().is_empty() => StylePreset::parse(style)?,
        _ => StylePreset::default(),
    };
    let mut prompt = state.prompt_composer.compose(&verse_text, style);
    if let Some(custom) = &body.custom_prompt {
        let sanitized = state.validator.sanitize_prompt(custom);
        if !sanitized.is_empty() {
            prompt = format!("{}, {}", prompt, sanitized);
        }
    }

    // Model invocation, bounded by the configured deadline.
    let generated = match state.model.run(&GenerationTask::new(prompt.clone())).await {
        Ok(generated) => generated,
        Err(err) => {
            state.telemetry.track_generation(false, user_id.as_deref());
            return Err(err);
        }
    };

    // Content-safety gate runs before anything is persisted.
    let verdict = state.moderation.should_store(
        &generated.bytes,
        &ContentMetadata {
            prompt: prompt.clone(),
            verse_text: verse_text.clone(),
        },
    );
    if !verdict.should_store {
        state.telemetry.track_generation(false, user_id.as_deref());
        return Err(AppError::ContentBlocked(
            verdict
                .flag_reason
                .unwrap_or_else(|| "Content failed the safety check".to_string()),
        ));
    }

    // Durable write path: blob put + metadata insert + cache populate.
    let record = state
        .storage
        .save_image(
            &generated.bytes,
            SaveImageOptions {
                user_id: user_id.clone(),
                verse_reference: verse_reference.clone(),
                verse_text: verse_text.clone(),
                prompt,
                style_preset: style,
                width: generated.width as i32,
                height: generated.height as i32,
                tags: Vec::new(),
                moderation_status: verdict.moderation_status,
                requested_id: body.request_id.clone(),
                generated_at: Utc::now(),
            },
        )
        .await?;

    state.telemetry.track_generation(true, user_id.as_deref());
    state.telemetry.track_blob_write(record.file_size as u64);
    state.telemetry.track_store_write();

    build_response(state, &record).await
}

fn validation_error(report: &crate::services::validation::ValidationReport) -> AppError {
    let missing_reference = report
        .errors
        .iter()
        .any(|issue| issue.code == "missing_required_field");
    if missing_reference {
        return AppError::MissingRequiredField("verseReference".to_string());
    }

    let bad_reference = report
        .errors
        .iter()
        .find(|issue| issue.code == "invalid_verse_reference");
    if let (Some(issue), 1) = (bad_reference, report.errors.len()) {
        return AppError::InvalidVerseReference(issue.message.clone());
    }

    AppError::invalid_request_with_details("Request validation failed", report.details())
}

async fn build_response(state: &AppState, record: &ImageRecord) -> Result<GenerateResponse> {
    if record.moderation_status == ModerationStatus::Rejected {
        return Err(AppError::ContentBlocked(
            "This image was rejected by moderation".to_string(),
        ));
    }

    let image_url = state.storage.get_image_url(&record.id, false, None).await?;
    let share_url = whatsapp_share_url(&record.verse_text, &record.verse_reference, &image_url);

    Ok(GenerateResponse {
        image_id: record.id.clone(),
        image_url,
        whatsapp_share_url: share_url,
        verse_reference: record.verse_reference.clone(),
        verse_text: record.verse_text.clone(),
    })
}
