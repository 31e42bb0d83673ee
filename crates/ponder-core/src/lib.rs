//! # ponder-core
//!
//! Foundation types shared by every Ponder crate.
//!
//! - **Branded IDs**: [`SessionId`] and [`SubscriptionId`] newtypes
//! - **Wire events**: [`SessionEvent`], [`EventKind`], and the [`EventDraft`] builder
//! - **Sessions**: [`SessionStatus`] and the [`SessionRecord`] handed to history storage
//! - **Tool outcomes**: [`ToolOutcome`], the success/error envelope tools return
//! - **Retry**: [`retry::RetryConfig`] and backoff math
//! - **Logging**: [`logging::init_subscriber`] for the global `tracing` subscriber

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod logging;
pub mod retry;
pub mod session;
pub mod tools;

pub use events::{EventDraft, EventKind, SessionEvent};
pub use ids::{SessionId, SubscriptionId};
pub use session::{SessionRecord, SessionStatus};
pub use tools::ToolOutcome;
