//! Model traits and error taxonomy.

use std::sync::Arc;

use async_trait::async_trait;

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors a model call can produce.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The request exceeded its deadline.
    #[error("model request timed out after {elapsed_ms}ms")]
    Timeout {
        /// Configured deadline.
        elapsed_ms: u64,
    },

    /// Credentials missing or rejected.
    #[error("auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// Rate limited by the backend.
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested delay in milliseconds (0 when unknown).
        retry_after_ms: u64,
        /// Error description.
        message: String,
    },

    /// Backend returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
        /// Whether the request may succeed if repeated.
        retryable: bool,
    },

    /// Response did not contain usable text.
    #[error("malformed response: {message}")]
    Malformed {
        /// What was missing.
        message: String,
    },

    /// No model is registered under this identifier.
    #[error("unknown model: {model}")]
    UnknownModel {
        /// Requested identifier.
        model: String,
    },

    /// The call was abandoned because the session was cancelled.
    #[error("model call cancelled")]
    Cancelled,
}

impl ModelError {
    /// Whether repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s == reqwest::StatusCode::TOO_MANY_REQUESTS || s.is_server_error()
                    })
            }
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Malformed { .. } => true,
            Self::Api { retryable, .. } => *retryable,
            Self::Auth { .. } | Self::UnknownModel { .. } | Self::Cancelled => false,
        }
    }

    /// Backend-suggested delay, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
                Some(*retry_after_ms)
            }
            _ => None,
        }
    }

    /// Short category label for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(_) => "network",
            Self::Timeout { .. } => "timeout",
            Self::Auth { .. } => "auth",
            Self::RateLimited { .. } => "rate_limit",
            Self::Api { .. } => "api",
            Self::Malformed { .. } => "parse",
            Self::UnknownModel { .. } => "config",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Text generation backend.
///
/// Implementors must be `Send + Sync`; one instance is shared by every
/// step of a session.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier (e.g. `"gemini-flash-latest"`).
    fn model_id(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> ModelResult<String>;
}

/// Resolves model identifiers to [`LanguageModel`] instances.
///
/// Called once per session with the session's selected model.
pub trait ModelProvider: Send + Sync {
    /// Create (or look up) the model for `model`.
    fn model_for(&self, model: &str) -> ModelResult<Arc<dyn LanguageModel>>;
}
