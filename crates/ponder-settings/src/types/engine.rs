//! Model, reasoning-engine, and broker settings.

use serde::{Deserialize, Serialize};

/// Model selection and generation parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    /// Model used when a session does not name one.
    pub default_model: String,
    /// Models a session may select.
    pub supported: Vec<String>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum output tokens per call.
    pub max_output_tokens: u32,
    /// Nucleus sampling.
    pub top_p: f64,
    /// Top-k sampling.
    pub top_k: u32,
    /// Generative Language API base URL.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// API key. Normally supplied via `GOOGLE_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            default_model: "gemini-flash-latest".to_string(),
            supported: vec![
                "gemini-flash-latest".to_string(),
                "gemini-pro-latest".to_string(),
            ],
            temperature: 0.7,
            max_output_tokens: 2048,
            top_p: 0.8,
            top_k: 40,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            request_timeout_ms: 60_000,
            api_key: None,
        }
    }
}

impl ModelSettings {
    /// Whether `model` may be selected for a session.
    pub fn is_supported(&self, model: &str) -> bool {
        self.supported.iter().any(|m| m == model)
    }
}

/// Reasoning loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Observations between re-planning steps.
    pub planning_interval: u32,
    /// Thought cycles before the engine forces a final answer.
    pub max_thought_cycles: u32,
    /// Hard cap on steps; derived from `max_thought_cycles` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            planning_interval: 3,
            max_thought_cycles: 5,
            max_steps: None,
        }
    }
}

impl EngineSettings {
    /// Step cap, falling back to four steps per cycle plus one planning round.
    pub fn effective_max_steps(&self) -> u32 {
        self.max_steps
            .unwrap_or_else(|| self.max_thought_cycles.saturating_mul(4).saturating_add(4))
    }
}

/// Session broker limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Sessions that may be registered at once.
    pub max_active_sessions: usize,
    /// Events retained per session for replay.
    pub event_buffer_capacity: usize,
    /// Queued events per subscriber before it is disconnected.
    pub subscriber_queue_capacity: usize,
    /// Delay between completion and eviction so subscribers can drain.
    pub eviction_grace_ms: u64,
    /// Deadline for a stream attach to acknowledge.
    pub attach_timeout_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_active_sessions: 100,
            event_buffer_capacity: 10_000,
            subscriber_queue_capacity: 256,
            eviction_grace_ms: 5_000,
            attach_timeout_ms: 30_000,
        }
    }
}
