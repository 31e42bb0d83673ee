//! Tool registry: central index of all registered tools.
//!
//! [`ToolRegistry::execute`] never fails. Unknown tools, tool errors, and
//! timeouts all come back as a [`ToolOutcome`] with `success: false`, so the
//! reasoning loop can observe them and continue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ponder_core::ToolOutcome;
use serde_json::Value;
use tracing::{debug, warn};

use crate::traits::Tool;

/// Tool executions total (counter, labels: tool, success).
pub const TOOL_EXECUTIONS_TOTAL: &str = "tool_executions_total";

/// Central registry mapping tool names to their implementations.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: None,
        }
    }

    /// Fail executions that run longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool_name = tool.name(), "tool registered");
        let _ = self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted alphabetically.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// `- name: description` lines, sorted by name.
    pub fn describe(&self) -> String {
        let mut tools: Vec<&Arc<dyn Tool>> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute `name` with `args`, folding every failure into the outcome.
    pub async fn execute(&self, name: &str, args: Value) -> ToolOutcome {
        let Some(tool) = self.get(name) else {
            warn!(tool_name = name, "tool not found");
            record(name, false);
            return ToolOutcome::failure(format!("Tool '{name}' not found"));
        };

        let run = tool.execute(args);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(tool_name = name, timeout_ms = limit.as_millis(), "tool timed out");
                    record(name, false);
                    return ToolOutcome::failure(format!(
                        "Tool '{name}' timed out after {}ms",
                        limit.as_millis()
                    ));
                }
            },
            None => run.await,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(tool_name = name, error = %err, "tool raised an error");
                ToolOutcome::failure(err.to_string())
            }
        };
        debug!(tool_name = name, success = outcome.success, "tool executed");
        record(name, outcome.success);
        outcome
    }
}

fn record(tool: &str, success: bool) {
    metrics::counter!(
        TOOL_EXECUTIONS_TOTAL,
        "tool" => tool.to_owned(),
        "success" => if success { "true" } else { "false" }
    )
    .increment(1);
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
