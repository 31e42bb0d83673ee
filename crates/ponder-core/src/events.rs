//! Session events: the externally visible, sequenced record of a session.
//!
//! Producers build an [`EventDraft`]; the broker stamps it with the next
//! sequence number and a timestamp, turning it into an immutable
//! [`SessionEvent`]. Events serialize to the wire shape
//! `{sequence, type, content, tool?, tool_input?, tool_result?, error?, todo?, timestamp}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a session event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Session execution began. Content is the original query.
    Start,
    /// A planning step produced or revised the todo list.
    Planning,
    /// A reasoning step.
    Thought,
    /// A tool invocation.
    Action,
    /// The interpreted outcome of the preceding action.
    Observation,
    /// The terminal answer.
    FinalAnswer,
    /// The session failed or was terminated.
    Error,
    /// End of stream.
    End,
}

impl EventKind {
    /// Wire name (`"final_answer"`, `"planning"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Planning => "planning",
            Self::Thought => "thought",
            Self::Action => "action",
            Self::Observation => "observation",
            Self::FinalAnswer => "final_answer",
            Self::Error => "error",
            Self::End => "end",
        }
    }

    /// Whether this kind closes the stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::End | Self::Error)
    }
}

/// An immutable, sequenced session event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Position in the session's log, starting at 0.
    pub sequence: u64,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Human-readable content.
    pub content: String,
    /// Tool name (action/observation events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Tool arguments (action events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    /// Tool payload (action/observation events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,
    /// Error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Todo snapshot (planning events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo: Option<String>,
    /// When the broker appended the event.
    pub timestamp: DateTime<Utc>,
}

/// An event before the broker has assigned it a sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDraft {
    /// Event kind.
    pub kind: EventKind,
    /// Content.
    pub content: String,
    /// Tool name.
    pub tool: Option<String>,
    /// Tool arguments.
    pub tool_input: Option<Value>,
    /// Tool payload.
    pub tool_result: Option<Value>,
    /// Error message.
    pub error: Option<String>,
    /// Todo snapshot.
    pub todo: Option<String>,
}

impl EventDraft {
    /// Draft with only a kind and content.
    pub fn new(kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tool: None,
            tool_input: None,
            tool_result: None,
            error: None,
            todo: None,
        }
    }

    /// Attach a tool name.
    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// Attach tool arguments.
    #[must_use]
    pub fn with_tool_input(mut self, input: Value) -> Self {
        self.tool_input = Some(input);
        self
    }

    /// Attach a tool payload.
    #[must_use]
    pub fn with_tool_result(mut self, result: Value) -> Self {
        self.tool_result = Some(result);
        self
    }

    /// Attach an error message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach a todo snapshot.
    #[must_use]
    pub fn with_todo(mut self, todo: impl Into<String>) -> Self {
        self.todo = Some(todo.into());
        self
    }

    /// Stamp the draft with a sequence number and the current time.
    pub fn into_event(self, sequence: u64) -> SessionEvent {
        SessionEvent {
            sequence,
            kind: self.kind,
            content: self.content,
            tool: self.tool,
            tool_input: self.tool_input,
            tool_result: self.tool_result,
            error: self.error,
            todo: self.todo,
            timestamp: Utc::now(),
        }
    }
}
