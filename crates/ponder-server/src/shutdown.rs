//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use ponder_runtime::SessionService;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time to wait for sessions and the listener before giving up.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates shutdown of the listener, open event streams, and sessions.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown. The listener stops accepting and event streams close.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Shut everything down in order.
    ///
    /// 1. Cancel the token (listener drains, event streams end)
    /// 2. Cancel running sessions and wait up to `timeout` for them
    /// 3. Wait up to `timeout` for the listener task
    pub async fn graceful_shutdown(
        &self,
        service: &SessionService,
        listener: JoinHandle<()>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            running_sessions = service.runner().running_count(),
            timeout_secs = timeout.as_secs(),
            "waiting for sessions and listener to finish"
        );

        service.shutdown(timeout).await;

        if tokio::time::timeout(timeout, listener).await.is_err() {
            warn!("listener did not stop within {timeout:?}");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ponder_llm::LanguageModel;
    use ponder_llm::testing::{FnModel, StaticProvider};
    use ponder_runtime::{
        BrokerConfig, MemoryHistory, SessionBroker, SessionOptions, SessionServiceConfig,
    };
    use ponder_tools::ToolRegistry;

    fn service() -> SessionService {
        let model: Arc<dyn LanguageModel> = Arc::new(
            FnModel::new("gemini-flash-latest", |_| Ok("hmm".to_owned()))
                .with_delay(Duration::from_secs(3600)),
        );
        SessionService::new(
            SessionBroker::new(BrokerConfig::default(), Arc::new(MemoryHistory::new())),
            Arc::new(StaticProvider::single(model)),
            Arc::new(ToolRegistry::new()),
            SessionServiceConfig::default(),
        )
    }

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_is_idempotent_and_reaches_tokens() {
        let coord = ShutdownCoordinator::default();
        let token = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_stops_sessions_and_listener() {
        let coord = ShutdownCoordinator::new();
        let service = service();
        let id = service
            .create_session("q", None, SessionOptions::default())
            .unwrap();
        assert!(service.runner().is_running(&id));

        let token = coord.token();
        let listener = tokio::spawn(async move {
            token.cancelled().await;
        });

        coord
            .graceful_shutdown(&service, listener, Some(Duration::from_secs(5)))
            .await;
        assert!(coord.is_shutting_down());
        assert_eq!(service.runner().running_count(), 0);
    }

    #[tokio::test]
    async fn graceful_shutdown_times_out_on_stuck_listener() {
        let coord = ShutdownCoordinator::new();
        let listener = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        coord
            .graceful_shutdown(&service(), listener, Some(Duration::from_millis(50)))
            .await;
        assert!(coord.is_shutting_down());
    }
}
