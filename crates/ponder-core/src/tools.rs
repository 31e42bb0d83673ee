//! Tool outcome envelope.
//!
//! Tool failures are data: every execution produces a [`ToolOutcome`],
//! and the reasoning loop observes failed outcomes like successful ones.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of executing one tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Whether the tool did what was asked.
    pub success: bool,
    /// Tool payload (may be `null` on failure).
    #[serde(default)]
    pub result: Value,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    /// Successful outcome.
    pub fn ok(result: impl Into<Value>) -> Self {
        Self {
            success: true,
            result: result.into(),
            error: None,
        }
    }

    /// Failed outcome with an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.into()),
        }
    }

    /// Render the payload as text for prompts.
    pub fn result_text(&self) -> String {
        match &self.result {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
