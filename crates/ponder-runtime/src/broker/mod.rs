//! Session broker: event logs, fan-out, replay.

mod log;
mod session_broker;
mod subscription;

pub use log::{Replay, SessionEventLog};
pub use session_broker::{BrokerConfig, SessionBroker, SessionOutcome, SessionSnapshot};
pub use subscription::{Subscription, SubscriptionItem};
