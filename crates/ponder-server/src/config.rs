//! Server configuration.

use std::time::Duration;

use ponder_settings::PonderSettings;

/// Configuration for the HTTP server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// How long an event-stream attach may take before the request fails.
    pub attach_timeout: Duration,
    /// Interval between SSE keep-alive comments.
    pub keep_alive_interval: Duration,
    /// How long shutdown waits for running sessions.
    pub shutdown_timeout: Duration,
    /// Page size when a list request names none.
    pub default_page_size: usize,
    /// Largest page a list request may ask for.
    pub max_page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            attach_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(10),
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl From<&PonderSettings> for ServerConfig {
    fn from(settings: &PonderSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            attach_timeout: Duration::from_millis(settings.broker.attach_timeout_ms),
            shutdown_timeout: Duration::from_millis(settings.server.shutdown_timeout_ms),
            ..Self::default()
        }
    }
}
