//! Script generation via Gemini.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ugc_models::{GeneratedScript, ProductData, VideoStyle};

use crate::error::{ApiError, ApiResult};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Models tried in order until one returns a usable script.
const DEFAULT_MODELS: &[&str] = &["gemini-2.5-flash", "gemini-2.5-flash-lite", "gemini-2.5-pro"];

/// Caller hints for script generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptOptions {
    /// Target length in seconds
    #[serde(default)]
    pub target_duration: Option<u32>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Produces a video script for a product.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate(
        &self,
        product: &ProductData,
        style: VideoStyle,
        options: &ScriptOptions,
    ) -> ApiResult<GeneratedScript>;
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// [`ScriptGenerator`] backed by the Gemini `generateContent` API.
pub struct GeminiScriptGenerator {
    api_key: String,
    base_url: String,
    models: Vec<String>,
    client: Client,
}

impl GeminiScriptGenerator {
    pub fn new(api_key: impl Into<String>) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ApiError::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            client,
        })
    }

    pub fn from_env() -> ApiResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ApiError::internal("GEMINI_API_KEY not configured"))?;
        let mut generator = Self::new(api_key)?;
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            generator.models.retain(|m| m != &model);
            generator.models.insert(0, model);
        }
        Ok(generator)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    async fn call_model(&self, model: &str, prompt: &str) -> ApiResult<GeneratedScript> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                temperature: 0.8,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::ScriptGeneration(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::ScriptGeneration(format!(
                "model {} returned {}: {}",
                model,
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ScriptGeneration(format!("unreadable response: {}", e)))?;
        let text = body
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| ApiError::ScriptGeneration("empty response".to_string()))?;

        parse_script(text)
    }
}

#[async_trait]
impl ScriptGenerator for GeminiScriptGenerator {
    async fn generate(
        &self,
        product: &ProductData,
        style: VideoStyle,
        options: &ScriptOptions,
    ) -> ApiResult<GeneratedScript> {
        let prompt = build_script_prompt(product, style, options);
        let mut last_error = None;

        for model in &self.models {
            match self.call_model(model, &prompt).await {
                Ok(script) => {
                    info!(model = %model, scenes = script.scenes.len(), "Generated script");
                    return Ok(script);
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "Script model failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ApiError::ScriptGeneration("no script models configured".to_string())))
    }
}

fn style_direction(style: VideoStyle) -> &'static str {
    match style {
        VideoStyle::ProductShowcase => {
            "Hero shots of the product with on-screen callouts for its key features. Punchy, visual, no presenter."
        }
        VideoStyle::TalkingHead => {
            "A relatable creator speaking straight to camera, sharing an honest first-hand opinion of the product."
        }
        VideoStyle::Lifestyle => {
            "The product used naturally in everyday moments, with a light voiceover tying the scenes together."
        }
    }
}

pub fn build_script_prompt(product: &ProductData, style: VideoStyle, options: &ScriptOptions) -> String {
    let duration = options.target_duration.unwrap_or(15).clamp(5, 60);
    let mut prompt = format!(
        "Write a short-form vertical UGC video script for the product below.\n\
         Style: {} ({})\n\
         Target length: about {} seconds.\n",
        style.label(),
        style_direction(style),
        duration
    );
    if let Some(tone) = options.tone.as_deref().filter(|t| !t.trim().is_empty()) {
        prompt.push_str(&format!("Tone: {}\n", tone.trim()));
    }
    if let Some(language) = options.language.as_deref().filter(|l| !l.trim().is_empty()) {
        prompt.push_str(&format!("Language: {}\n", language.trim()));
    }

    prompt.push_str(&format!("\nProduct: {}\n", product.title));
    if let Some(brand) = &product.brand {
        prompt.push_str(&format!("Brand: {}\n", brand));
    }
    if let Some(price) = &product.price {
        prompt.push_str(&format!("Price: {}\n", price));
    }
    if let Some(description) = &product.description {
        let description: String = description.chars().take(1500).collect();
        prompt.push_str(&format!("Description: {}\n", description));
    }
    if !product.features.is_empty() {
        prompt.push_str("Features:\n");
        for feature in product.features.iter().take(10) {
            prompt.push_str(&format!("- {}\n", feature));
        }
    }

    prompt.push_str(
        "\nRespond with JSON only, shaped as:\n\
         {\"script\": string, \"estimatedDuration\": seconds, \
         \"scenes\": [{\"order\": n, \"description\": string, \"duration\": seconds, \"voiceover\": string}]}\n",
    );
    prompt
}

/// Parse model output, tolerating a fenced ```json block.
pub fn parse_script(text: &str) -> ApiResult<GeneratedScript> {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text).trim();

    let mut script: GeneratedScript = serde_json::from_str(text)
        .map_err(|e| ApiError::ScriptGeneration(format!("malformed script JSON: {}", e)))?;

    script.script = script.script.trim().to_string();
    if script.script.is_empty() {
        return Err(ApiError::ScriptGeneration("model returned an empty script".to_string()));
    }
    if script.estimated_duration == 0 {
        script.estimated_duration = script.scenes.iter().map(|s| s.duration).sum::<u32>().max(15);
    }
    script.scenes.sort_by_key(|s| s.order);
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_script_strips_code_fence() {
        let text = "```json\n{\"script\": \" Hi there \", \"estimatedDuration\": 12, \"scenes\": [\
                    {\"order\": 2, \"description\": \"b\"}, {\"order\": 1, \"description\": \"a\"}]}\n```";
        let script = parse_script(text).unwrap();
        assert_eq!(script.script, "Hi there");
        assert_eq!(script.estimated_duration, 12);
        assert_eq!(script.scenes[0].order, 1);
    }

    #[test]
    fn test_parse_script_rejects_empty_script() {
        let err = parse_script("{\"script\": \"  \", \"estimatedDuration\": 10}").unwrap_err();
        assert_eq!(err.code(), "SCRIPT_GENERATION_FAILED");
    }

    #[test]
    fn test_prompt_carries_style_and_product() {
        let product = ProductData::new("Trail Runner 2").with_description("Lightweight shoe");
        let prompt = build_script_prompt(&product, VideoStyle::TalkingHead, &ScriptOptions::default());
        assert!(prompt.contains("Talking Head"));
        assert!(prompt.contains("Trail Runner 2"));
        assert!(prompt.contains("about 15 seconds"));
    }

    #[tokio::test]
    async fn test_falls_back_to_next_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/primary:generateContent"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/backup:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text":
                    "{\"script\": \"Meet your new bottle.\", \"estimatedDuration\": 10, \"scenes\": []}"
                }]}}]
            })))
            .mount(&server)
            .await;

        let generator = GeminiScriptGenerator::new("key")
            .unwrap()
            .with_base_url(server.uri())
            .with_models(vec!["primary".into(), "backup".into()]);
        let script = generator
            .generate(&ProductData::new("Bottle"), VideoStyle::Lifestyle, &ScriptOptions::default())
            .await
            .unwrap();
        assert_eq!(script.script, "Meet your new bottle.");
    }
}
