//! Tool error types.

use thiserror::Error;

/// Errors a tool implementation may raise.
///
/// The registry converts these into failed outcomes; they never abort a session.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments missing or of the wrong shape.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The tool ran and failed.
    #[error("execution failed: {0}")]
    Execution(String),
}
