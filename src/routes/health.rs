/*
 * ©AngelaMos | 2025
 */

use axum::{extract::State, Json};
use serde::Serialize;

use crate::utils::error::Result;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub services: serde_json::Value,
}

/// GET /health
/// Probes the metadata store and the cache backend and reports aggregate status.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    let store_status = match state.storage.meta_store().get_image("__health_probe__").await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    // The cache is allowed to be down; it only degrades the service.
    let cache_status = if state.storage.cache().health_check().await {
        "healthy"
    } else {
        "degraded"
    };

    let status = if store_status == "healthy" {
        "healthy"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: serde_json::json!({
            "meta_store": store_status,
            "cache": cache_status,
            "embedded_verses": state.verse_resolver.embedded_count(),
        }),
    }))
}
