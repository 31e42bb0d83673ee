//! Google Gemini via the Generative Language REST API.
//!
//! Uses the non-streaming `generateContent` endpoint with API-key auth:
//! `POST {base_url}/models/{model}:generateContent?key={api_key}`.
//! The response text is the concatenation of the first candidate's parts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ponder_settings::ModelSettings;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, instrument};

use crate::model::{LanguageModel, ModelError, ModelProvider, ModelResult};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Sampling parameters sent with every request.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum output tokens.
    pub max_output_tokens: u32,
    /// Nucleus sampling.
    pub top_p: f64,
    /// Top-k sampling.
    pub top_k: u32,
}

/// Everything needed to talk to one Gemini model.
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    /// Model identifier.
    pub model: String,
    /// API key.
    pub api_key: String,
    /// API base URL (no trailing slash).
    pub base_url: String,
    /// Sampling parameters.
    pub generation: GenerationConfig,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl GeminiConfig {
    /// Build from settings for the given model.
    pub fn from_settings(settings: &ModelSettings, model: &str, api_key: String) -> Self {
        Self {
            model: model.to_owned(),
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            generation: GenerationConfig {
                temperature: settings.temperature,
                max_output_tokens: settings.max_output_tokens,
                top_p: settings.top_p,
                top_k: settings.top_k,
            },
            timeout: Duration::from_millis(settings.request_timeout_ms),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model
// ─────────────────────────────────────────────────────────────────────────────

/// One Gemini model.
pub struct GeminiModel {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiModel {
    /// Create with a shared HTTP client.
    pub fn with_client(config: GeminiConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url, self.config.model, self.config.api_key
        )
    }

    fn request_body(&self, prompt: &str) -> Value {
        serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": self.config.generation,
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn generate(&self, prompt: &str) -> ModelResult<String> {
        debug!(prompt_len = prompt.len(), "calling generateContent");

        let response = self
            .client
            .post(self.api_url())
            .timeout(self.config.timeout)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(0, |secs| secs * 1000);
            let body_text = response.text().await.unwrap_or_default();
            let (message, retryable) = parse_api_error(&body_text, status.as_u16());
            error!(status = status.as_u16(), retryable, "Gemini API error");
            return match status.as_u16() {
                429 => Err(ModelError::RateLimited {
                    retry_after_ms: retry_after,
                    message,
                }),
                401 | 403 => Err(ModelError::Auth { message }),
                code => Err(ModelError::Api {
                    status: code,
                    message,
                    retryable,
                }),
            };
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        extract_text(&body)
    }
}

impl GeminiModel {
    fn map_transport_error(&self, err: reqwest::Error) -> ModelError {
        if err.is_timeout() {
            #[allow(clippy::cast_possible_truncation)]
            let elapsed_ms = self.config.timeout.as_millis() as u64;
            ModelError::Timeout { elapsed_ms }
        } else if err.is_decode() {
            ModelError::Malformed {
                message: err.to_string(),
            }
        } else {
            ModelError::Http(err)
        }
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(body: &Value) -> ModelResult<String> {
    let candidate = body["candidates"]
        .get(0)
        .ok_or_else(|| ModelError::Malformed {
            message: "response has no candidates".into(),
        })?;

    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate["finishReason"].as_str().unwrap_or("unknown");
        return Err(ModelError::Malformed {
            message: format!("candidate has no text (finishReason: {reason})"),
        });
    }
    Ok(text)
}

/// Parse an API error response body into (message, retryable).
fn parse_api_error(body: &str, status: u16) -> (String, bool) {
    let retryable = status == 429 || status >= 500;
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| format!("HTTP {status}: {body}"));
    (message, retryable)
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Creates [`GeminiModel`]s for supported model identifiers.
pub struct GeminiProvider {
    settings: ModelSettings,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Provider over the configured models.
    pub fn new(settings: ModelSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }
}

impl ModelProvider for GeminiProvider {
    fn model_for(&self, model: &str) -> ModelResult<Arc<dyn LanguageModel>> {
        if !self.settings.is_supported(model) {
            return Err(ModelError::UnknownModel {
                model: model.to_owned(),
            });
        }
        let api_key = self
            .settings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ModelError::Auth {
                message: "no Gemini API key configured (set GOOGLE_API_KEY)".into(),
            })?;
        let config = GeminiConfig::from_settings(&self.settings, model, api_key);
        Ok(Arc::new(GeminiModel::with_client(config, self.client.clone())))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
