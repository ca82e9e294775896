/*
 * Image model client invoking the external generation endpoint with a bounded deadline and payload decoding.
 * I'm implementing comprehensive upstream communication with status checking, base64 decoding, and error mapping onto the service taxonomy.
 */

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::models::ImageFormat;
use crate::utils::error::{AppError, Result};

pub const DEFAULT_STEPS: u32 = 4;
pub const DEFAULT_DIMENSION: u32 = 1024;

/// One generation request to the model
#[derive(Debug, Clone)]
pub struct GenerationTask {
    pub prompt: String,
    pub steps: u32,
    pub seed: Option<u64>,
    pub width: u32,
    pub height: u32,
}

impl GenerationTask {
    pub fn new<T: Into<String>>(prompt: T) -> Self {
        Self {
            prompt: prompt.into(),
            steps: DEFAULT_STEPS,
            seed: None,
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
        }
    }
}

/// Decoded model output
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub duration: Duration,
}

/// Port over the image generation model
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn run(&self, task: &GenerationTask) -> Result<GeneratedImage>;
}

pub type SharedImageModel = Arc<dyn ImageModel>;

/// Wire shape of the model endpoint's JSON response
#[derive(Debug, Deserialize)]
struct ModelResponse {
    image: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// HTTP adapter for the image model endpoint
#[derive(Debug, Clone)]
pub struct HttpImageModel {
    client: reqwest::Client,
    endpoint: String,
    deadline: Duration,
}

impl HttpImageModel {
    /// Build the client with optimal settings for the model endpoint
    pub fn new(endpoint: String, token: Option<String>, deadline: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("verse-canvas/0.1.0"));
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                AppError::ConfigurationError(format!("Invalid model API token: {}", e))
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                AppError::ConfigurationError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint,
            deadline,
        })
    }

    async fn invoke(&self, task: &GenerationTask) -> Result<(Vec<u8>, Option<u32>, Option<u32>)> {
        let body = serde_json::json!({
            "prompt": task.prompt,
            "num_steps": task.steps,
            "seed": task.seed,
            "width": task.width,
            "height": task.height,
        });

        debug!("Invoking image model at {}", self.endpoint);

        let response = self.client.post(&self.endpoint).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ModelInferenceFailed(format!(
                "model endpoint returned {}: {}",
                status, error_text
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("image/") {
            let bytes = response.bytes().await?;
            return Ok((bytes.to_vec(), None, None));
        }

        let parsed: ModelResponse = response.json().await.map_err(|e| {
            AppError::ModelInferenceFailed(format!("malformed model response: {}", e))
        })?;

        let encoded = parsed.image.ok_or_else(|| {
            AppError::ModelInferenceFailed("model response carried no image payload".to_string())
        })?;

        let bytes = BASE64.decode(encoded.as_bytes()).map_err(|e| {
            AppError::ModelInferenceFailed(format!("invalid base64 image payload: {}", e))
        })?;

        Ok((bytes, parsed.width, parsed.height))
    }
}

#[async_trait]
impl ImageModel for HttpImageModel {
    async fn run(&self, task: &GenerationTask) -> Result<GeneratedImage> {
        let start = Instant::now();

        let (bytes, width, height) = tokio::time::timeout(self.deadline, self.invoke(task))
            .await
            .map_err(|_| {
                AppError::AiServiceTimeout(format!(
                    "model call exceeded {}s deadline",
                    self.deadline.as_secs()
                ))
            })??;

        if bytes.is_empty() {
            return Err(AppError::ModelInferenceFailed(
                "model returned an empty image".to_string(),
            ));
        }

        let duration = start.elapsed();
        let format = ImageFormat::from_magic_bytes(&bytes);

        info!(
            duration_ms = duration.as_millis() as u64,
            format = %format,
            size_bytes = bytes.len(),
            "Image model call completed"
        );

        Ok(GeneratedImage {
            bytes,
            format,
            width: width.unwrap_or(task.width),
            height: height.unwrap_or(task.height),
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    fn model_for(server: &MockServer, deadline: Duration) -> HttpImageModel {
        HttpImageModel::new(format!("{}/generate", server.uri()), None, deadline).unwrap()
    }

    #[tokio::test]
    async fn test_decodes_base64_payload() {
        let server = MockServer::start().await;
        let encoded = BASE64.encode(PNG_MAGIC);

        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "image": encoded,
                "width": 512,
                "height": 512,
            })))
            .mount(&server)
            .await;

        let model = model_for(&server, Duration::from_secs(5));
        let result = model.run(&GenerationTask::new("a prompt")).await.unwrap();

        assert_eq!(result.bytes, PNG_MAGIC);
        assert_eq!(result.format, ImageFormat::Png);
        assert_eq!(result.width, 512);
        assert_eq!(result.height, 512);
    }

    #[tokio::test]
    async fn test_upstream_failure_maps_to_inference_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let model = model_for(&server, Duration::from_secs(5));
        let err = model.run(&GenerationTask::new("a prompt")).await.unwrap_err();
        assert_eq!(err.code(), "model_inference_failed");
    }

    #[tokio::test]
    async fn test_empty_payload_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "image": "",
            })))
            .mount(&server)
            .await;

        let model = model_for(&server, Duration::from_secs(5));
        let err = model.run(&GenerationTask::new("a prompt")).await.unwrap_err();
        assert_eq!(err.code(), "model_inference_failed");
    }

    #[tokio::test]
    async fn test_deadline_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"image": BASE64.encode(PNG_MAGIC)}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let model = model_for(&server, Duration::from_millis(50));
        let err = model.run(&GenerationTask::new("a prompt")).await.unwrap_err();
        assert_eq!(err.code(), "ai_service_timeout");
    }

    #[test]
    fn test_task_defaults() {
        let task = GenerationTask::new("p");
        assert_eq!(task.steps, DEFAULT_STEPS);
        assert_eq!(task.width, DEFAULT_DIMENSION);
        assert_eq!(task.height, DEFAULT_DIMENSION);
        assert!(task.seed.is_none());
    }
}
