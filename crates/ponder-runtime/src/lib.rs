//! # ponder-runtime
//!
//! Session execution and fan-out.
//!
//! - [`engine`]: `StepState`, the step-transition rules, prompts, response
//!   parsing, and the [`ReasoningEngine`] that runs one step at a time
//! - [`broker`]: the [`SessionBroker`] owning every active session's record,
//!   windowed event log, and subscribers
//! - [`runner`]: the [`BackgroundRunner`] driving one supervised task per session
//! - [`history`]: the [`HistoryStore`] collaborator for completed sessions
//! - [`service`]: the [`SessionService`] façade used by the API layer

#![deny(unsafe_code)]

pub mod broker;
pub mod engine;
pub mod errors;
pub mod history;
pub mod metrics;
pub mod runner;
pub mod service;

pub use broker::{
    BrokerConfig, SessionBroker, SessionOutcome, SessionSnapshot, Subscription, SubscriptionItem,
};
pub use engine::{EngineConfig, ReasoningEngine, Step, StepState, StepType};
pub use errors::{BrokerError, EngineError, HistoryError, ServiceError};
pub use history::{HistoryStore, HistorySummary, JsonFileHistory, MemoryHistory, StoredSession};
pub use runner::BackgroundRunner;
pub use service::{SessionDetails, SessionOptions, SessionService, SessionServiceConfig};
