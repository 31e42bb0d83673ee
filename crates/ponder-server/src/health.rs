//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server accepts requests, `"shutting_down"` after.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Sessions held by the broker (running or in their eviction grace).
    pub active_sessions: usize,
    /// Sessions with a running task.
    pub running_sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    shutting_down: bool,
    active_sessions: usize,
    running_sessions: usize,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        active_sessions,
        running_sessions,
    }
}
