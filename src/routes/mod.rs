/*
 * Routes module aggregator organizing all HTTP endpoints with consistent structure and middleware integration.
 * I'm implementing clean route organization plus the CORS envelope: OPTIONS preflights answer 204 and
 * Access-Control-Allow-Origin is echoed only for origins on the configured allow-list.
 */

pub mod admin;
pub mod daily_verse;
pub mod generate;
pub mod health;
pub mod images;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::AppState;

/// Create the complete application router with all endpoints and middleware
pub fn create_app(state: AppState) -> Router {
    info!("Creating application router with all endpoints");

    let mut router = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/generate", post(generate::generate_image))
        .route("/api/images/:id", get(images::get_image_info))
        .route("/api/images/:id/data", get(images::get_image_data))
        .route("/api/images/:id/share", get(images::share_image))
        .route("/api/daily-verse", get(daily_verse::get_daily_verse))
        .route("/api/verses/search", get(daily_verse::search_verses))
        .route("/api/admin/moderate", post(admin::moderate_image))
        .route("/api/admin/moderation-queue", get(admin::moderation_queue));

    // The manual daily-verse override only exists in development.
    if state.config.is_development() {
        router = router.route(
            "/internal/set-daily-verse",
            post(daily_verse::set_daily_verse),
        );
    }

    router
        .fallback(handle_404)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(60)))
                .layer(DefaultBodyLimit::max(1024 * 1024))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    cors_middleware,
                )),
        )
        .with_state(state)
}

/// CORS envelope middleware.
/// Preflights answer 204; the allow-origin header is echoed only when the
/// request Origin appears on the configured list. Disallowed origins are still
/// processed, they just receive no CORS grant.
async fn cors_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let allowed_origin = origin.filter(|origin| {
        state
            .config
            .allowed_origins
            .iter()
            .any(|allowed| allowed == origin)
    });

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(&mut response, allowed_origin.as_deref(), true);
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(&mut response, allowed_origin.as_deref(), false);
    response
}

fn apply_cors_headers(response: &mut Response, allowed_origin: Option<&str>, preflight: bool) {
    let headers = response.headers_mut();

    if let Some(origin) = allowed_origin {
        if let Ok(value) = HeaderValue::from_str(origin) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }

    if preflight {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Authorization"),
        );
        headers.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static("86400"),
        );
    }
}

/// Derive the rate-limit identity and tier for a request.
/// Authenticated subjects bucket by their bearer subject; anonymous traffic
/// buckets by client IP (CF-Connecting-IP first, then the proxy headers).
pub fn request_identity(headers: &axum::http::HeaderMap) -> (String, crate::services::Tier) {
    if let Some(subject) = bearer_subject(headers) {
        return (format!("user:{}", subject), crate::services::Tier::Authenticated);
    }

    let ip = headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-forwarded-for"))
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(',').next().unwrap_or(value).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    (format!("ip:{}", ip), crate::services::Tier::Anonymous)
}

/// Extract the bearer subject from the Authorization header, if any
pub fn bearer_subject(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// encodeURIComponent-compatible set: everything but ASCII alphanumerics and
/// `- _ . ! ~ * ' ( )` is escaped.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Build the WhatsApp share URL with the bit-exact text payload:
/// `"{verseText}" - {verseReference}\n{imageUrl}`
pub fn whatsapp_share_url(verse_text: &str, verse_reference: &str, image_url: &str) -> String {
    let text = format!("\"{}\" - {}\n{}", verse_text, verse_reference, image_url);
    format!(
        "https://wa.me/?text={}",
        utf8_percent_encode(&text, URI_COMPONENT)
    )
}

/// Fallback handler producing the standard error envelope for unknown routes
pub async fn handle_404() -> Response {
    crate::utils::error::AppError::not_found("endpoint").into_response()
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn test_whatsapp_url_round_trips() {
        let url = whatsapp_share_url(
            "For God so loved the world",
            "John 3:16",
            "https://images.example.com/images/2026/08/abc.webp",
        );
        assert!(url.starts_with("https://wa.me/?text="));

        let encoded = url.strip_prefix("https://wa.me/?text=").unwrap();
        let decoded = percent_encoding::percent_decode_str(encoded)
            .decode_utf8()
            .unwrap();
        assert_eq!(
            decoded,
            "\"For God so loved the world\" - John 3:16\nhttps://images.example.com/images/2026/08/abc.webp"
        );
    }

    #[test]
    fn test_identity_prefers_cf_connecting_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", "192.168.1.1".parse().unwrap());
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        let (identity, tier) = request_identity(&headers);
        assert_eq!(identity, "ip:192.168.1.1");
        assert_eq!(tier, crate::services::Tier::Anonymous);
    }

    #[test]
    fn test_identity_uses_bearer_subject_when_present() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer subject-42".parse().unwrap());

        let (identity, tier) = request_identity(&headers);
        assert_eq!(identity, "user:subject-42");
        assert_eq!(tier, crate::services::Tier::Authenticated);
    }

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 5.6.7.8".parse().unwrap());

        let (identity, _) = request_identity(&headers);
        assert_eq!(identity, "ip:1.2.3.4");
    }
}
