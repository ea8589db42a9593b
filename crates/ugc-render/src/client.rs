//! HTTP render provider client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{RenderError, RenderResult};
use crate::parse::{parse_job_id, parse_status};
use crate::provider::{GenerationMode, ProviderStatus, RenderProvider, RenderRequest};

#[derive(Debug, Clone)]
pub struct RenderClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    /// Retries for transient create/status failures
    pub max_retries: u32,
    /// Refuse downloads larger than this
    pub max_result_bytes: usize,
}

impl Default for RenderClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.kie.ai".to_string(),
            api_key: String::new(),
            model: "sora-2".to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 2,
            max_result_bytes: 512 * 1024 * 1024,
        }
    }
}

impl RenderClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("RENDER_API_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("RENDER_API_KEY").unwrap_or_default(),
            model: std::env::var("RENDER_MODEL").unwrap_or(defaults.model),
            timeout: std::env::var("RENDER_API_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: std::env::var("RENDER_API_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            ..defaults
        }
    }

    fn model_for(&self, mode: GenerationMode) -> String {
        match mode {
            GenerationMode::TextToVideo => format!("{}-text-to-video", self.model),
            GenerationMode::ImageToVideo => format!("{}-image-to-video", self.model),
        }
    }
}

/// Client for a task-style video generation API.
pub struct HttpRenderClient {
    http: Client,
    config: RenderClientConfig,
}

impl HttpRenderClient {
    pub fn new(config: RenderClientConfig) -> RenderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(RenderError::Network)?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> RenderResult<Self> {
        Self::new(RenderClientConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> RenderResult<Value> {
        let response = request
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RenderError::from_status(status.as_u16(), body));
        }

        let body: Value = response.json().await?;
        // Task APIs often wrap failures in a 200 with their own code.
        if let Some(code) = body.get("code").and_then(Value::as_u64) {
            if code != 200 && code != 0 {
                let message = body
                    .get("msg")
                    .or_else(|| body.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                return Err(RenderError::from_status(code as u16, message));
            }
        }
        Ok(body)
    }

    async fn with_retry<F, Fut, T>(&self, operation: F) -> RenderResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = RenderResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Render request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether the provider answers at all.
    pub async fn health_check(&self) -> bool {
        match self.http.get(self.url("/health")).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                warn!("Render provider health check error: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl RenderProvider for HttpRenderClient {
    async fn create_job(&self, request: &RenderRequest) -> RenderResult<String> {
        let url = self.url("/api/v1/jobs/createTask");
        let mut input = json!({
            "prompt": request.prompt,
            "aspect_ratio": request.aspect_ratio,
            "duration": request.duration,
        });
        if let Some(image) = &request.image_url {
            input["image_urls"] = json!([image]);
        }
        let body = json!({
            "model": self.config.model_for(request.mode),
            "input": input,
        });

        debug!(mode = ?request.mode, "Submitting render job");
        let response = self
            .with_retry(|| self.send_json(self.http.post(&url).json(&body)))
            .await?;

        let job_id = parse_job_id(&response)?;
        info!(provider_job_id = %job_id, "Render job created");
        Ok(job_id)
    }

    async fn get_status(&self, job_id: &str) -> RenderResult<ProviderStatus> {
        let url = self.url("/api/v1/jobs/recordInfo");
        let response = self
            .with_retry(|| {
                self.send_json(self.http.get(&url).query(&[("taskId", job_id)]))
            })
            .await?;

        Ok(parse_status(&response))
    }

    async fn fetch_result(&self, url: &str) -> RenderResult<Vec<u8>> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RenderError::from_status(status.as_u16(), body));
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.config.max_result_bytes {
                return Err(RenderError::InvalidResponse(format!(
                    "result is {} bytes, limit {}",
                    len, self.config.max_result_bytes
                )));
            }
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(RenderError::InvalidResponse("empty result body".to_string()));
        }
        debug!(size = bytes.len(), "Fetched render result");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RenderState;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpRenderClient {
        HttpRenderClient::new(RenderClientConfig {
            base_url: server.uri(),
            api_key: "test-key".into(),
            max_retries: 1,
            ..Default::default()
        })
        .unwrap()
    }

    fn request(image: Option<&str>) -> RenderRequest {
        crate::prompt::build_request("Great mug.", ugc_models::VideoStyle::Lifestyle, image, 10)
    }

    #[test]
    fn test_config_defaults() {
        let config = RenderClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.model_for(GenerationMode::ImageToVideo), "sora-2-image-to-video");
    }

    #[tokio::test]
    async fn test_create_job_parses_nested_task_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/jobs/createTask"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "code": 200, "data": { "taskId": "task-123" } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let job_id = client(&server)
            .create_job(&request(Some("https://cdn/p.jpg")))
            .await
            .unwrap();
        assert_eq!(job_id, "task-123");
    }

    #[tokio::test]
    async fn test_create_job_without_id_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&server)
            .await;

        let err = client(&server).create_job(&request(None)).await.unwrap_err();
        assert!(matches!(err, RenderError::MissingJobId(_)));
    }

    #[tokio::test]
    async fn test_create_job_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server).create_job(&request(None)).await.unwrap_err();
        assert!(err.is_upstream_unavailable());
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad prompt"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).create_job(&request(None)).await.unwrap_err();
        assert!(matches!(err, RenderError::RequestFailed { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_get_status_completed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/jobs/recordInfo"))
            .and(query_param("taskId", "task-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200,
                "data": { "state": "success", "resultUrls": ["https://cdn/out.mp4"] }
            })))
            .mount(&server)
            .await;

        let status = client(&server).get_status("task-123").await.unwrap();
        assert_eq!(status.state, RenderState::Completed);
        assert_eq!(status.result_url.as_deref(), Some("https://cdn/out.mp4"));
    }

    #[tokio::test]
    async fn test_fetch_result_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/out.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let bytes = client(&server)
            .fetch_result(&format!("{}/out.mp4", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_empty_result_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_result(&format!("{}/out.mp4", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidResponse(_)));
    }
}
