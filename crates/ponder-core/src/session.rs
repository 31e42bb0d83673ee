//! Session status and the record handed to history storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Lifecycle status of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Registered, no step has run yet.
    #[default]
    Created,
    /// The background runner is driving the reasoning loop.
    Running,
    /// Finished with a final answer.
    Completed,
    /// Aborted by a fatal error or terminated by the client.
    Failed,
}

impl SessionStatus {
    /// Whether no further events will be produced.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// The durable part of a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identity.
    pub session_id: SessionId,
    /// The original user query.
    pub query: String,
    /// Selected model identifier.
    pub model: String,
    /// Current status.
    pub status: SessionStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Completion time, once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of events appended so far.
    pub event_count: u64,
    /// Latest plan (markdown checklist).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo: Option<String>,
    /// Failure reason for failed sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionRecord {
    /// Fresh record in the `Created` state.
    pub fn new(session_id: SessionId, query: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            session_id,
            query: query.into(),
            model: model.into(),
            status: SessionStatus::Created,
            created_at: Utc::now(),
            completed_at: None,
            event_count: 0,
            todo: None,
            error: None,
        }
    }
}
