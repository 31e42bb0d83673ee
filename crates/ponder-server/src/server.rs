//! `PonderServer`: Axum HTTP server over the session service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use ponder_runtime::SessionService;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::routes;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session facade.
    pub service: SessionService,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// The Ponder HTTP server.
pub struct PonderServer {
    config: Arc<ServerConfig>,
    service: SessionService,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl PonderServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, service: SessionService) -> Self {
        Self {
            config: Arc::new(config),
            service,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            service: self.service.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route(
                "/api/sessions",
                get(routes::list_sessions).post(routes::create_session),
            )
            .route(
                "/api/sessions/{id}",
                get(routes::get_session).delete(routes::terminate_session),
            )
            .route("/api/sessions/{id}/events", get(routes::stream_events))
            .route("/api/history", get(routes::list_history))
            .route("/health", get(routes::health_handler))
            .route("/metrics", get(routes::metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve in the background until the shutdown token fires.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(err) = served {
                error!(error = %err, "server error");
            }
            info!("listener stopped");
        });
        Ok((addr, handle))
    }

    /// The session service.
    pub fn service(&self) -> &SessionService {
        &self.service
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use ponder_llm::LanguageModel;
    use ponder_llm::testing::{FnModel, StaticProvider};
    use ponder_runtime::{BrokerConfig, MemoryHistory, SessionBroker, SessionServiceConfig};
    use ponder_tools::ToolRegistry;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn quick_model() -> Arc<dyn LanguageModel> {
        Arc::new(FnModel::new("gemini-flash-latest", |prompt| {
            Ok(if prompt.ends_with("Planning:") {
                "- [ ] answer it".to_owned()
            } else if prompt.ends_with("Final Answer:") {
                "Final Answer: 4".to_owned()
            } else {
                "easy <final_answer_ready/>".to_owned()
            })
        }))
    }

    fn slow_model() -> Arc<dyn LanguageModel> {
        Arc::new(
            FnModel::new("gemini-flash-latest", |_| Ok("hmm".to_owned()))
                .with_delay(Duration::from_secs(3600)),
        )
    }

    fn make_server_with(model: Arc<dyn LanguageModel>, broker: BrokerConfig) -> PonderServer {
        let service = SessionService::new(
            SessionBroker::new(broker, Arc::new(MemoryHistory::new())),
            Arc::new(StaticProvider::single(model)),
            Arc::new(ToolRegistry::new()),
            SessionServiceConfig::default(),
        );
        PonderServer::new(ServerConfig::default(), service)
    }

    fn make_server() -> PonderServer {
        make_server_with(quick_model(), BrokerConfig::default())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn body_text(resp: axum::response::Response) -> String {
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    async fn create(app: &Router, body: Value) -> String {
        let resp = app
            .clone()
            .oneshot(post_json("/api/sessions", &body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        body_json(resp).await["session_id"]
            .as_str()
            .unwrap()
            .to_owned()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server().router();
        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["active_sessions"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn create_then_stream_whole_session() {
        let server = make_server();
        let app = server.router();
        let id = create(&app, json!({"query": "2 + 2?"})).await;

        let resp = app
            .clone()
            .oneshot(get(&format!("/api/sessions/{id}/events")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );
        let text = body_text(resp).await;
        assert!(text.starts_with("event: open\n"));
        assert!(text.contains("event: start\n"));
        assert!(text.contains("id: 0\n"));
        assert!(text.contains("event: final_answer\n"));
        assert!(text.contains("\"content\":\"4\""));
        assert!(text.contains("event: end\n"));

        let resp = app
            .oneshot(get(&format!("/api/sessions/{id}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let details = body_json(resp).await;
        assert_eq!(details["session_id"], id.as_str());
        assert_eq!(details["query"], "2 + 2?");
        assert_eq!(details["todo"], "- [ ] answer it");
    }

    #[tokio::test]
    async fn last_event_id_resumes_stream() {
        let app = make_server().router();
        let id = create(&app, json!({"query": "q"})).await;
        let _ = body_text(
            app.clone()
                .oneshot(get(&format!("/api/sessions/{id}/events")))
                .await
                .unwrap(),
        )
        .await;

        let req = Request::builder()
            .uri(format!("/api/sessions/{id}/events?from=0"))
            .header("last-event-id", "2")
            .body(Body::empty())
            .unwrap();
        let text = body_text(app.oneshot(req).await.unwrap()).await;
        assert!(text.contains("\"from\":3"));
        assert!(!text.contains("id: 2\n"));
        assert!(text.contains("id: 3\n"));
    }

    #[tokio::test]
    async fn rejects_bad_requests() {
        let app = make_server().router();
        let resp = app
            .clone()
            .oneshot(post_json("/api/sessions", &json!({"query": "q", "model": "gpt-4"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], "unsupported_model");

        let resp = app
            .clone()
            .oneshot(post_json("/api/sessions", &json!({"query": ""})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = Request::builder()
            .uri("/api/sessions/abc/events")
            .header("last-event-id", "nope")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let app = make_server().router();
        for req in [
            get("/api/sessions/missing"),
            get("/api/sessions/missing/events"),
            Request::builder()
                .method("DELETE")
                .uri("/api/sessions/missing")
                .body(Body::empty())
                .unwrap(),
        ] {
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn terminate_running_session() {
        let app = make_server_with(slow_model(), BrokerConfig::default()).router();
        let id = create(&app, json!({"query": "q", "planningInterval": 2})).await;

        let delete = || {
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/sessions/{id}"))
                .body(Body::empty())
                .unwrap()
        };
        let resp = app.clone().oneshot(delete()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["status"], "terminating");

        let text = body_text(
            app.clone()
                .oneshot(get(&format!("/api/sessions/{id}/events")))
                .await
                .unwrap(),
        )
        .await;
        assert!(text.contains("event: error\n"));
        assert!(text.contains("\"content\":\"terminated\""));

        for _ in 0..100 {
            let resp = app.clone().oneshot(delete()).await.unwrap();
            if resp.status() == StatusCode::CONFLICT {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("terminated session still accepts termination");
    }

    #[tokio::test]
    async fn capacity_maps_to_503() {
        let app = make_server_with(
            slow_model(),
            BrokerConfig {
                max_active_sessions: 1,
                ..BrokerConfig::default()
            },
        )
        .router();
        let _ = create(&app, json!({"query": "one"})).await;
        let resp = app
            .clone()
            .oneshot(post_json("/api/sessions", &json!({"query": "two"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = app.oneshot(get("/api/sessions?limit=10")).await.unwrap();
        let listed = body_json(resp).await;
        assert_eq!(listed["sessions"].as_array().unwrap().len(), 1);
        assert_eq!(listed["limit"], 10);
    }

    #[tokio::test]
    async fn history_lists_completed_sessions() {
        let app = make_server().router();
        let id = create(&app, json!({"query": "q"})).await;
        let _ = body_text(
            app.clone()
                .oneshot(get(&format!("/api/sessions/{id}/events")))
                .await
                .unwrap(),
        )
        .await;

        let mut listed = Value::Null;
        for _ in 0..100 {
            let resp = app.clone().oneshot(get("/api/history")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            listed = body_json(resp).await;
            if !listed["sessions"].as_array().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(listed["sessions"][0]["session_id"], id.as_str());
        assert_eq!(listed["sessions"][0]["final_answer"], "4");
    }

    #[tokio::test]
    async fn metrics_absent_without_recorder() {
        let app = make_server().router();
        let resp = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server().router();
        let resp = app.oneshot(get("/nonexistent")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_and_shut_down() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server
            .shutdown()
            .graceful_shutdown(server.service(), handle, Some(Duration::from_secs(5)))
            .await;
        assert!(server.shutdown().is_shutting_down());
    }
}
