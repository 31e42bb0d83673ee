//! # ponder-tools
//!
//! The tool collaborator seen from the reasoning loop.
//!
//! - [`Tool`]: one named capability taking JSON arguments
//! - [`ToolRegistry`]: name → tool index whose [`ToolRegistry::execute`]
//!   turns every failure into a [`ToolOutcome`](ponder_core::ToolOutcome)
//! - [`FnTool`]: closure-backed tool for wiring and tests

#![deny(unsafe_code)]

pub mod errors;
pub mod registry;
pub mod traits;

pub use errors::ToolError;
pub use registry::ToolRegistry;
pub use traits::{FnTool, Tool};
