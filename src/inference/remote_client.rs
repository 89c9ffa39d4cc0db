use crate::{
    config::RemoteConfig,
    error::{AppError, Result},
    inference::ImageBackend,
    models::{InferencePayload, UpstreamErrorBody},
};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, StatusCode,
};

/// Longest raw upstream body passed on to clients.
const MAX_ERROR_CHARS: usize = 500;

/// Hosted text-to-image endpoint reached with a bearer token.
#[derive(Clone)]
pub struct RemoteInferenceBackend {
    client: Client,
    url: String,
    auth_header: HeaderValue,
}

impl RemoteInferenceBackend {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let token = config.auth_token.ok_or_else(|| {
            AppError::ConfigError(
                "HF_TOKEN (or INFERENCE_API_TOKEN) is required for the remote backend".into(),
            )
        })?;

        let mut auth_header = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|_| AppError::ConfigError("Auth token contains invalid characters".into()))?;
        auth_header.set_sensitive(true);

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        log::debug!(
            "Remote backend targets {} with a {}s timeout",
            config.url,
            config.timeout.as_secs()
        );

        Ok(Self {
            client,
            url: config.url,
            auth_header,
        })
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.auth_header.clone());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }
}

#[async_trait]
impl ImageBackend for RemoteInferenceBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.url)
            .headers(self.build_headers())
            .json(&InferencePayload { inputs: prompt })
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if status == StatusCode::OK && content_type.contains("image") {
            let bytes = response.bytes().await.map_err(map_request_error)?;
            return Ok(bytes.to_vec());
        }

        let body = response.text().await.map_err(map_request_error)?;

        if status.is_success() {
            log::warn!(
                "Inference service answered {} with content type '{}' and no image: {}",
                status,
                content_type,
                body
            );
            return Err(AppError::UpstreamError {
                status: StatusCode::BAD_GATEWAY.as_u16(),
                message: "Inference service returned no image data".into(),
            });
        }

        log::warn!("Inference service rejected request with {}: {}", status, body);
        Err(AppError::UpstreamError {
            status: status.as_u16(),
            message: upstream_message(status, &body),
        })
    }
}

/// Prefers the structured `error` field, then the raw body. Either is capped
/// at `MAX_ERROR_CHARS`.
pub(crate) fn upstream_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<UpstreamErrorBody>(body) {
        if let Some(message) = parsed.error.into_message() {
            return truncate(&message);
        }
    }

    let raw = body.trim();
    if raw.is_empty() {
        format!("Inference service returned status {}", status.as_u16())
    } else {
        truncate(raw)
    }
}

fn truncate(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_CHARS) {
        Some((cut, _)) => format!("{}...", &message[..cut]),
        None => message.to_string(),
    }
}

fn map_request_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout
    } else if err.is_connect() {
        log::error!("Could not connect to inference service: {}", err);
        AppError::UpstreamError {
            status: StatusCode::BAD_GATEWAY.as_u16(),
            message: "Could not reach the inference service".into(),
        }
    } else if err.is_body() || err.is_decode() {
        AppError::UpstreamError {
            status: StatusCode::BAD_GATEWAY.as_u16(),
            message: "Invalid response from the inference service".into(),
        }
    } else {
        AppError::InternalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];

    fn backend_for(server: &MockServer, timeout: Duration) -> RemoteInferenceBackend {
        let config = RemoteConfig::new()
            .with_url(format!("{}/models/flux", server.uri()))
            .with_token("test-token")
            .with_timeout(timeout);
        RemoteInferenceBackend::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_returns_raw_image_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/flux"))
            .and(header("Authorization", "Bearer test-token"))
            .and(body_json(serde_json::json!({ "inputs": "a lighthouse at dusk" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(PNG_BYTES.to_vec(), "image/png"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server, Duration::from_secs(5));
        let bytes = backend.generate("a lighthouse at dusk").await.unwrap();
        assert_eq!(bytes, PNG_BYTES);
    }

    #[tokio::test]
    async fn test_structured_error_message_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(503)
                    .set_body_json(serde_json::json!({ "error": "Model is currently loading" })),
            )
            .mount(&server)
            .await;

        let backend = backend_for(&server, Duration::from_secs(5));
        match backend.generate("anything").await {
            Err(AppError::UpstreamError { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "Model is currently loading");
            }
            other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
        }
    }

    #[tokio::test]
    async fn test_raw_error_body_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("prompt rejected"))
            .mount(&server)
            .await;

        let backend = backend_for(&server, Duration::from_secs(5));
        match backend.generate("anything").await {
            Err(AppError::UpstreamError { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "prompt rejected");
            }
            other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
        }
    }

    #[tokio::test]
    async fn test_success_without_image_maps_to_bad_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })),
            )
            .mount(&server)
            .await;

        let backend = backend_for(&server, Duration::from_secs(5));
        assert!(matches!(
            backend.generate("anything").await,
            Err(AppError::UpstreamError { status: 502, .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(PNG_BYTES.to_vec(), "image/png")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let backend = backend_for(&server, Duration::from_millis(200));
        assert!(matches!(
            backend.generate("anything").await,
            Err(AppError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_bad_gateway() {
        let config = RemoteConfig::new()
            .with_url("http://127.0.0.1:1/models/flux")
            .with_token("test-token")
            .with_timeout(Duration::from_secs(5));
        let backend = RemoteInferenceBackend::new(config).unwrap();

        assert!(matches!(
            backend.generate("anything").await,
            Err(AppError::UpstreamError { status: 502, .. })
        ));
    }

    #[test]
    fn test_upstream_message_fallbacks() {
        assert_eq!(
            upstream_message(StatusCode::BAD_REQUEST, r#"{"error": ["too long", "bad token"]}"#),
            "too long; bad token"
        );
        assert_eq!(
            upstream_message(StatusCode::INTERNAL_SERVER_ERROR, r#"{"detail": "boom"}"#),
            r#"{"detail": "boom"}"#
        );
        assert_eq!(
            upstream_message(StatusCode::TOO_MANY_REQUESTS, "  "),
            "Inference service returned status 429"
        );
    }

    #[test]
    fn test_long_raw_body_is_truncated() {
        let page = format!("<html><body>{}</body></html>", "x".repeat(4096));
        let message = upstream_message(StatusCode::BAD_GATEWAY, &page);

        assert_eq!(message.chars().count(), MAX_ERROR_CHARS + 3);
        assert!(message.starts_with("<html><body>xxx"));
        assert!(message.ends_with("..."));

        let structured = format!(r#"{{"error": "{}"}}"#, "é".repeat(MAX_ERROR_CHARS));
        assert_eq!(
            upstream_message(StatusCode::BAD_REQUEST, &structured),
            "é".repeat(MAX_ERROR_CHARS)
        );
        let structured = format!(r#"{{"error": "{}"}}"#, "é".repeat(MAX_ERROR_CHARS + 1));
        assert_eq!(
            upstream_message(StatusCode::BAD_REQUEST, &structured),
            format!("{}...", "é".repeat(MAX_ERROR_CHARS))
        );
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let err = RemoteInferenceBackend::new(RemoteConfig::new()).err().unwrap();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
