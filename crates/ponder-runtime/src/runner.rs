//! One supervised background task per session.
//!
//! The task drives the [`ReasoningEngine`] step by step and publishes every
//! step through the [`SessionBroker`]. Whatever happens inside (final answer,
//! fatal error, cancellation, panic) the session is completed or terminated
//! exactly once and the run is forgotten. Subscribers never influence it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use ponder_core::{EventDraft, EventKind, SessionId, SessionStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::broker::{SessionBroker, SessionOutcome};
use crate::engine::{ReasoningEngine, StepState, StepType};
use crate::errors::{BrokerError, EngineError};

/// Error recorded when a run is cancelled.
pub const TERMINATED_REASON: &str = "terminated";

struct ActiveRun {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum RunEnd {
    Completed,
    Failed(String),
    Cancelled,
    /// The broker stopped accepting events for this session.
    Detached(BrokerError),
}

/// Spawns and tracks session tasks.
#[derive(Clone)]
pub struct BackgroundRunner {
    broker: SessionBroker,
    runs: Arc<Mutex<HashMap<SessionId, ActiveRun>>>,
}

impl BackgroundRunner {
    /// Create a runner publishing through `broker`.
    pub fn new(broker: SessionBroker) -> Self {
        Self {
            broker,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start the session's task. Returns `false` if it is already running.
    ///
    /// The session must already be registered with the broker.
    pub fn start(&self, session_id: SessionId, query: String, engine: ReasoningEngine) -> bool {
        let mut runs = self.runs.lock();
        if runs.contains_key(&session_id) {
            warn!(%session_id, "session already has a running task");
            return false;
        }

        let cancel = CancellationToken::new();
        let span = info_span!("session", %session_id, model = engine.model_id());
        let task = supervise(
            self.broker.clone(),
            Arc::clone(&self.runs),
            session_id.clone(),
            query,
            engine,
            cancel.clone(),
        );
        let handle = tokio::spawn(task.instrument(span));
        let _ = runs.insert(session_id, ActiveRun { cancel, handle });
        true
    }

    /// Request cooperative cancellation. Returns whether the session was running.
    pub fn cancel(&self, session_id: &SessionId) -> bool {
        match self.runs.lock().get(session_id) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether the session's task is still running.
    pub fn is_running(&self, session_id: &SessionId) -> bool {
        self.runs.lock().contains_key(session_id)
    }

    /// Tasks currently running.
    pub fn running_count(&self) -> usize {
        self.runs.lock().len()
    }

    /// Cancel every run and wait up to `timeout` for them to wind down.
    /// Tasks still running afterwards are aborted.
    pub async fn shutdown(&self, timeout: Duration) {
        let handles: Vec<JoinHandle<()>> = {
            let mut runs = self.runs.lock();
            runs.drain()
                .map(|(_, run)| {
                    run.cancel.cancel();
                    run.handle
                })
                .collect()
        };
        if handles.is_empty() {
            return;
        }
        info!(
            task_count = handles.len(),
            timeout_ms = timeout.as_millis(),
            "waiting for session tasks to finish"
        );
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("session tasks did not finish within {timeout:?}, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

async fn supervise(
    broker: SessionBroker,
    runs: Arc<Mutex<HashMap<SessionId, ActiveRun>>>,
    session_id: SessionId,
    query: String,
    engine: ReasoningEngine,
    cancel: CancellationToken,
) {
    let end = AssertUnwindSafe(drive(&broker, &session_id, query, &engine, &cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            error!(panic = %message, "session task panicked");
            RunEnd::Failed(format!("internal error: {message}"))
        });

    let result = match end {
        RunEnd::Completed => broker.complete_session(&session_id, SessionOutcome::Completed).await,
        RunEnd::Failed(message) => {
            broker
                .complete_session(&session_id, SessionOutcome::Failed(message))
                .await
        }
        RunEnd::Cancelled => broker.terminate_session(&session_id, TERMINATED_REASON),
        RunEnd::Detached(err) => {
            warn!(error = %err, "broker no longer accepts events for this session");
            Ok(())
        }
    };
    if let Err(err) = result {
        warn!(error = %err, "could not finalize session");
    }

    let _ = runs.lock().remove(&session_id);
    debug!("session task finished");
}

async fn drive(
    broker: &SessionBroker,
    session_id: &SessionId,
    query: String,
    engine: &ReasoningEngine,
    cancel: &CancellationToken,
) -> RunEnd {
    if let Err(err) = broker.set_status(session_id, SessionStatus::Running) {
        return RunEnd::Detached(err);
    }
    if let Err(err) = broker.publish(session_id, EventDraft::new(EventKind::Start, query.clone())) {
        return RunEnd::Detached(err);
    }
    info!("session started");

    let mut state = StepState::new(query);
    loop {
        // A started tool call runs to completion; model waits observe the token.
        if cancel.is_cancelled() {
            return RunEnd::Cancelled;
        }

        let step = match engine.step(&mut state, cancel).await {
            Ok(Some(step)) => step,
            Ok(None) => return RunEnd::Completed,
            Err(EngineError::Cancelled) => return RunEnd::Cancelled,
            Err(err) => {
                warn!(category = err.category(), error = %err, "reasoning failed");
                return RunEnd::Failed(err.to_string());
            }
        };

        if step.step_type == StepType::Planning {
            if let Some(todo) = &step.todo {
                if let Err(err) = broker.set_todo(session_id, todo.clone()) {
                    return RunEnd::Detached(err);
                }
            }
        }
        if let Err(err) = broker.publish(session_id, step.to_event_draft()) {
            return RunEnd::Detached(err);
        }
        if step.step_type == StepType::FinalAnswer {
            return RunEnd::Completed;
        }
    }
}
