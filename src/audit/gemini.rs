use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::ModelConfig;

/// One structured-generation call against a hosted model.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub system_instruction: String,
    pub user_message: String,
    pub response_schema: Value,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub seed: i64,
    pub thinking_budget: Option<u32>,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Whether a credential is available. Unconfigured backends are never called.
    fn is_configured(&self) -> bool;

    /// Run the request and return the model's raw text output.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'static str,
    response_json_schema: &'a Value,
    temperature: f32,
    top_k: u32,
    top_p: f32,
    seed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

/// Client for the Gemini `generateContent` REST endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| anyhow!("Failed to build model HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl ModelBackend for GeminiClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Model API key is not configured"))?;

        let body = GenerateContentBody {
            system_instruction: Content {
                role: None,
                parts: vec![TextPart {
                    text: &request.system_instruction,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![TextPart {
                    text: &request.user_message,
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_json_schema: &request.response_schema,
                temperature: request.temperature,
                top_k: request.top_k,
                top_p: request.top_p,
                seed: request.seed,
                thinking_config: request
                    .thinking_budget
                    .map(|thinking_budget| ThinkingConfig { thinking_budget }),
            },
        };

        debug!("Calling model {}", request.model);

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Request to model {} failed: {}", request.model, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|b| format!("{} {}", b.error.code, b.error.message))
                .unwrap_or(text);
            return Err(anyhow!(
                "Model {} returned HTTP {}: {}",
                request.model,
                status,
                detail
            ));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Invalid response from model {}: {}", request.model, e))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(anyhow!("Model {} returned no output", request.model));
        }

        Ok(text)
    }
}
