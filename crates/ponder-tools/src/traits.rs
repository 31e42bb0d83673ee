//! The [`Tool`] trait.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use ponder_core::ToolOutcome;
use serde_json::Value;

use crate::errors::ToolError;

/// A named capability the reasoning loop can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key; also what the model writes in `"tool"`.
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// Run with the parsed `parameters` object.
    ///
    /// Returning `Ok` with `success: false` and returning `Err` are both
    /// observed by the loop as failed actions.
    async fn execute(&self, args: Value) -> Result<ToolOutcome, ToolError>;
}

type ToolFuture = Pin<Box<dyn Future<Output = Result<ToolOutcome, ToolError>> + Send>>;
type ToolFn = dyn Fn(Value) -> ToolFuture + Send + Sync;

/// Tool backed by an async closure.
pub struct FnTool {
    name: String,
    description: String,
    run: Box<ToolFn>,
}

impl FnTool {
    /// Wrap `run` under `name`.
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, run: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutcome, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            run: Box::new(move |args| Box::pin(run(args))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, args: Value) -> Result<ToolOutcome, ToolError> {
        (self.run)(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fn_tool_passes_arguments() {
        let tool = FnTool::new("echo", "Echo the input", |args| async move {
            Ok(ToolOutcome::ok(args["text"].clone()))
        });
        assert_eq!(tool.name(), "echo");
        assert_eq!(tool.description(), "Echo the input");
        let outcome = tool.execute(json!({"text": "hi"})).await.unwrap();
        assert_eq!(outcome.result, json!("hi"));
    }
}
