//! Metric name constants shared by the runtime and the server.

/// Sessions created total (counter, labels: model).
pub const SESSIONS_CREATED_TOTAL: &str = "sessions_created_total";
/// Sessions finished total (counter, labels: status).
pub const SESSIONS_FINISHED_TOTAL: &str = "sessions_finished_total";
/// Registered sessions, including ones waiting for eviction (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Events appended to session logs (counter, labels: type).
pub const SESSION_EVENTS_PUBLISHED_TOTAL: &str = "session_events_published_total";
/// Events dropped from full replay buffers (counter).
pub const SESSION_EVENTS_EVICTED_TOTAL: &str = "session_events_evicted_total";
/// Subscribers disconnected for falling behind (counter).
pub const SUBSCRIBER_LAGGED_TOTAL: &str = "subscriber_lagged_total";
/// Attached subscriptions across all sessions (gauge).
pub const SUBSCRIPTIONS_ACTIVE: &str = "subscriptions_active";
/// Reasoning step duration seconds (histogram, labels: step).
pub const STEP_DURATION_SECONDS: &str = "step_duration_seconds";
