//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so partial
//! JSON files work: missing fields get their compiled default.

mod engine;
mod server;

pub use engine::*;
pub use server::*;

use ponder_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "engine": { "planningInterval": 4 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PonderSettings {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Model selection and generation parameters.
    pub models: ModelSettings,
    /// Reasoning loop settings.
    pub engine: EngineSettings,
    /// Retry policy for model calls.
    pub retry: RetryConfig,
    /// Session broker limits.
    pub broker: BrokerSettings,
    /// Completed-session history storage.
    pub history: HistorySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl PonderSettings {
    /// Reject combinations the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.engine.planning_interval == 0 {
            return Err(SettingsError::InvalidValue(
                "engine.planningInterval must be at least 1".into(),
            ));
        }
        if self.engine.max_thought_cycles == 0 {
            return Err(SettingsError::InvalidValue(
                "engine.maxThoughtCycles must be at least 1".into(),
            ));
        }
        if self.broker.subscriber_queue_capacity == 0 || self.broker.event_buffer_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "broker capacities must be at least 1".into(),
            ));
        }
        if self.broker.max_active_sessions == 0 {
            return Err(SettingsError::InvalidValue(
                "broker.maxActiveSessions must be at least 1".into(),
            ));
        }
        if !self.models.is_supported(&self.models.default_model) {
            return Err(SettingsError::InvalidValue(format!(
                "models.defaultModel '{}' is not in models.supported",
                self.models.default_model
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"engine": {"planningInterval": 4}, "server": {"port": 9100}}"#;
        let settings: PonderSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.engine.planning_interval, 4);
        assert_eq!(settings.engine.max_thought_cycles, 5);
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(PonderSettings::default()).unwrap();
        assert!(value["engine"]["planningInterval"].is_number());
        assert!(value["broker"]["eventBufferCapacity"].is_number());
        assert!(value["models"]["defaultModel"].is_string());
        assert!(value["retry"]["maxRetries"].is_number());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut settings = PonderSettings::default();
        settings.engine.planning_interval = 0;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_unsupported_default_model() {
        let mut settings = PonderSettings::default();
        settings.models.default_model = "gpt-unknown".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("gpt-unknown"));
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut settings = PonderSettings::default();
        settings.broker.subscriber_queue_capacity = 0;
        assert!(settings.validate().is_err());
    }
}
