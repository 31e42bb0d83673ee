//! # ponder-llm
//!
//! The language-model collaborator.
//!
//! - [`LanguageModel`]: "generate text given a prompt"
//! - [`ModelProvider`]: resolves a session's model identifier to a [`LanguageModel`]
//! - [`ModelError`]: error taxonomy with [`ModelError::is_retryable`]
//! - [`generate_with_retry`]: bounded exponential-backoff retry at the call site
//! - [`gemini`]: Google Generative Language REST implementation
//! - [`testing`]: scripted models for exercising the reasoning loop offline

#![deny(unsafe_code)]

pub mod gemini;
pub mod model;
pub mod retry;
pub mod testing;

pub use model::{LanguageModel, ModelError, ModelProvider, ModelResult};
pub use retry::generate_with_retry;
