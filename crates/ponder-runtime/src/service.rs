//! Composition root used by the API layer.
//!
//! [`SessionService`] validates requests, resolves models, registers
//! sessions with the broker and hands them to the runner. Reads fall back to
//! the history store once a session has been evicted.

use std::sync::Arc;
use std::time::Duration;

use ponder_core::retry::RetryConfig;
use ponder_core::{SessionId, SessionRecord};
use ponder_llm::ModelProvider;
use ponder_settings::PonderSettings;
use ponder_tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::broker::{SessionBroker, SessionSnapshot, Subscription};
use crate::engine::{EngineConfig, LoopLimits, ReasoningEngine};
use crate::errors::{BrokerError, ServiceError};
use crate::history::{HistorySummary, StoredSession};
use crate::metrics::SESSIONS_CREATED_TOTAL;
use crate::runner::BackgroundRunner;

/// Service-wide defaults.
#[derive(Clone, Debug)]
pub struct SessionServiceConfig {
    /// Model used when a request names none.
    pub default_model: String,
    /// Models a request may name.
    pub supported_models: Vec<String>,
    /// Observations between re-planning steps.
    pub planning_interval: u32,
    /// Thought steps before a final answer is required.
    pub max_thought_cycles: u32,
    /// Hard cap on steps; derived from `max_thought_cycles` when unset.
    pub max_steps: Option<u32>,
    /// Retry policy for model calls.
    pub retry: RetryConfig,
}

impl From<&PonderSettings> for SessionServiceConfig {
    fn from(settings: &PonderSettings) -> Self {
        Self {
            default_model: settings.models.default_model.clone(),
            supported_models: settings.models.supported.clone(),
            planning_interval: settings.engine.planning_interval,
            max_thought_cycles: settings.engine.max_thought_cycles,
            max_steps: settings.engine.max_steps,
            retry: settings.retry.clone(),
        }
    }
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self::from(&PonderSettings::default())
    }
}

/// Per-session overrides supplied by the client.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// Observations between re-planning steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planning_interval: Option<u32>,
    /// Thought steps before a final answer is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_thought_cycles: Option<u32>,
}

/// A session as seen by readers: still in the broker, or only in history.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SessionDetails {
    /// Held by the broker.
    Active(SessionSnapshot),
    /// Evicted; loaded from history.
    Stored(StoredSession),
}

impl SessionDetails {
    /// Session ID.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Active(snapshot) => &snapshot.record.session_id,
            Self::Stored(stored) => &stored.record.session_id,
        }
    }

    /// The underlying record.
    pub fn record(&self) -> &SessionRecord {
        match self {
            Self::Active(snapshot) => &snapshot.record,
            Self::Stored(stored) => &stored.record,
        }
    }
}

/// Facade over broker, runner, models, tools and history.
#[derive(Clone)]
pub struct SessionService {
    broker: SessionBroker,
    runner: BackgroundRunner,
    models: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    config: Arc<SessionServiceConfig>,
}

impl SessionService {
    /// Wire a service around an existing broker.
    pub fn new(
        broker: SessionBroker,
        models: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        config: SessionServiceConfig,
    ) -> Self {
        Self {
            runner: BackgroundRunner::new(broker.clone()),
            broker,
            models,
            tools,
            config: Arc::new(config),
        }
    }

    /// The broker.
    pub fn broker(&self) -> &SessionBroker {
        &self.broker
    }

    /// The runner.
    pub fn runner(&self) -> &BackgroundRunner {
        &self.runner
    }

    /// Service defaults.
    pub fn config(&self) -> &SessionServiceConfig {
        &self.config
    }

    /// Start a new session and return its ID.
    ///
    /// Returns as soon as the session is registered and its task spawned;
    /// no reasoning step has run yet.
    #[instrument(skip(self, query, options))]
    pub fn create_session(
        &self,
        query: &str,
        model: Option<&str>,
        options: SessionOptions,
    ) -> Result<SessionId, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ServiceError::InvalidRequest("query must not be empty".into()));
        }
        let model = model.unwrap_or(self.config.default_model.as_str());
        if !self.config.supported_models.iter().any(|m| m == model) {
            return Err(ServiceError::UnsupportedModel(model.to_owned()));
        }
        let limits = self.limits(&options)?;
        let language_model = self.models.model_for(model)?;

        let session_id = SessionId::new();
        self.broker
            .register(SessionRecord::new(session_id.clone(), query, model))?;

        let engine = ReasoningEngine::new(
            language_model,
            Arc::clone(&self.tools),
            EngineConfig {
                limits,
                retry: self.config.retry.clone(),
            },
        );
        if !self.runner.start(session_id.clone(), query.to_owned(), engine) {
            return Err(ServiceError::Internal(format!(
                "session {session_id} already has a running task"
            )));
        }

        metrics::counter!(SESSIONS_CREATED_TOTAL, "model" => model.to_owned()).increment(1);
        info!(%session_id, model, "session created");
        Ok(session_id)
    }

    fn limits(&self, options: &SessionOptions) -> Result<LoopLimits, ServiceError> {
        let interval = options.planning_interval.unwrap_or(self.config.planning_interval);
        let cycles = options.max_thought_cycles.unwrap_or(self.config.max_thought_cycles);
        if interval == 0 {
            return Err(ServiceError::InvalidRequest(
                "planningInterval must be at least 1".into(),
            ));
        }
        if cycles == 0 {
            return Err(ServiceError::InvalidRequest(
                "maxThoughtCycles must be at least 1".into(),
            ));
        }
        let limits = LoopLimits::new(interval as usize, cycles as usize);
        Ok(match self.config.max_steps {
            Some(max) if options.max_thought_cycles.is_none() => limits.with_max_steps(max as usize),
            _ => limits,
        })
    }

    /// An active session's snapshot, or its stored copy once evicted.
    pub async fn get_session(&self, session_id: &SessionId) -> Result<SessionDetails, ServiceError> {
        if let Some(snapshot) = self.broker.get(session_id) {
            return Ok(SessionDetails::Active(snapshot));
        }
        self.broker
            .history()
            .get(session_id)
            .await?
            .map(SessionDetails::Stored)
            .ok_or_else(|| ServiceError::SessionNotFound(session_id.clone()))
    }

    /// Sessions held by the broker, newest first.
    pub fn list_active_sessions(&self, limit: usize, offset: usize) -> Vec<SessionSnapshot> {
        self.broker.list(limit, offset)
    }

    /// Completed sessions from history, newest first.
    pub async fn list_history(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistorySummary>, ServiceError> {
        Ok(self.broker.history().list(limit, offset).await?)
    }

    /// Attach to a session from `from_sequence`.
    ///
    /// Evicted sessions are replayed from history and the stream then ends.
    #[instrument(skip(self), fields(%session_id))]
    pub async fn subscribe(
        &self,
        session_id: &SessionId,
        from_sequence: u64,
    ) -> Result<Subscription, ServiceError> {
        match self.broker.subscribe(session_id, from_sequence) {
            Ok(subscription) => Ok(subscription),
            Err(BrokerError::SessionNotFound(_)) => {
                let stored = self
                    .broker
                    .history()
                    .get(session_id)
                    .await?
                    .ok_or_else(|| ServiceError::SessionNotFound(session_id.clone()))?;
                Ok(Subscription::replay_only(
                    session_id.clone(),
                    stored.events,
                    from_sequence,
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Cancel a running session.
    ///
    /// The runner records it as failed with a `terminated` error event and
    /// the broker evicts it without writing history.
    #[instrument(skip(self), fields(%session_id))]
    pub fn terminate(&self, session_id: &SessionId) -> Result<(), ServiceError> {
        if self.runner.cancel(session_id) {
            info!("termination requested");
            return Ok(());
        }
        if self.broker.contains(session_id) {
            Err(ServiceError::NotRunning(session_id.clone()))
        } else {
            Err(ServiceError::SessionNotFound(session_id.clone()))
        }
    }

    /// Cancel every running session and wait for their tasks.
    pub async fn shutdown(&self, timeout: Duration) {
        info!(running = self.runner.running_count(), "shutting down session service");
        self.runner.shutdown(timeout).await;
    }
}
