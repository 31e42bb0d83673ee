//! Runtime error types.

use ponder_core::SessionId;
use ponder_llm::ModelError;

use crate::engine::StepType;

/// Errors that abort the reasoning loop.
///
/// Tool failures are never represented here; they are recorded on the
/// step and observed like any other outcome.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The model failed after retries (or with a non-retryable error).
    #[error("{step} step failed: {source}")]
    Model {
        /// Step that was being produced.
        step: StepType,
        /// Underlying model error.
        #[source]
        source: ModelError,
    },

    /// Cancellation was observed while waiting to retry.
    #[error("engine cancelled")]
    Cancelled,
}

impl EngineError {
    /// Error category string for logs.
    pub fn category(&self) -> &str {
        match self {
            Self::Model { source, .. } => source.category(),
            Self::Cancelled => "cancelled",
        }
    }
}

/// Errors from the session broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// No active session with this ID.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Registering would exceed the active-session limit.
    #[error("too many active sessions (max {max})")]
    CapacityExceeded {
        /// Configured limit.
        max: usize,
    },

    /// The session already received its terminal event.
    #[error("session closed: {0}")]
    SessionClosed(SessionId),

    /// A session with this ID is already registered.
    #[error("session already registered: {0}")]
    AlreadyRegistered(SessionId),
}

/// Errors from history storage.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Filesystem failure.
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be (de)serialized.
    #[error("history JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session ID unusable as a storage key.
    #[error("invalid session id for storage: {0}")]
    InvalidId(String),
}

/// Errors surfaced by [`SessionService`](crate::SessionService).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The request itself is unusable (e.g. empty query).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Model not in the supported list.
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    /// Neither active nor in history.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session exists but is no longer running.
    #[error("session is not running: {0}")]
    NotRunning(SessionId),

    /// Active-session limit reached.
    #[error("too many active sessions (max {max})")]
    Capacity {
        /// Configured limit.
        max: usize,
    },

    /// Model could not be resolved (missing credentials, unknown model).
    #[error("model unavailable: {0}")]
    Model(#[from] ModelError),

    /// History lookup failed.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Unexpected broker state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<BrokerError> for ServiceError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::SessionNotFound(id) => Self::SessionNotFound(id),
            BrokerError::SessionClosed(id) => Self::NotRunning(id),
            BrokerError::CapacityExceeded { max } => Self::Capacity { max },
            BrokerError::AlreadyRegistered(id) => {
                Self::Internal(format!("session already registered: {id}"))
            }
        }
    }
}

impl ServiceError {
    /// Error category string for logs and API responses.
    pub fn category(&self) -> &str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnsupportedModel(_) => "unsupported_model",
            Self::SessionNotFound(_) => "session_not_found",
            Self::NotRunning(_) => "not_running",
            Self::Capacity { .. } => "capacity",
            Self::Model(_) => "model",
            Self::History(_) => "history",
            Self::Internal(_) => "internal",
        }
    }
}
