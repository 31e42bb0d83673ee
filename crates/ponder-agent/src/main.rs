//! # ponder-agent
//!
//! Ponder server binary: loads settings, wires the session service together
//! and serves the HTTP API until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ponder_llm::ModelProvider;
use ponder_llm::gemini::GeminiProvider;
use ponder_runtime::{
    BrokerConfig, HistoryStore, JsonFileHistory, MemoryHistory, SessionBroker, SessionService,
    SessionServiceConfig,
};
use ponder_server::{PonderServer, ServerConfig};
use ponder_settings::PonderSettings;
use ponder_tools::ToolRegistry;

/// Ponder reasoning-session server.
#[derive(Parser, Debug)]
#[command(name = "ponder-agent", about = "Ponder reasoning-session server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.ponder/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Directory for completed-session history (overrides settings).
    #[arg(long)]
    history_dir: Option<PathBuf>,

    /// Maximum concurrently active sessions (overrides settings).
    #[arg(long)]
    max_sessions: Option<usize>,
}

impl Cli {
    fn apply(&self, settings: &mut PonderSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(dir) = &self.history_dir {
            settings.history.directory = dir.to_string_lossy().into_owned();
        }
        if let Some(max) = self.max_sessions {
            settings.broker.max_active_sessions = max;
        }
    }
}

fn init_logging(settings: &PonderSettings) {
    if settings.logging.json {
        ponder_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        ponder_core::logging::init_subscriber(&settings.logging.level);
    }
}

async fn open_history(settings: &PonderSettings) -> Result<Arc<dyn HistoryStore>> {
    if !settings.history.enabled {
        tracing::info!("history persistence disabled, keeping completed sessions in memory");
        return Ok(Arc::new(MemoryHistory::new()));
    }
    let dir = ponder_settings::history_dir(settings);
    let store = JsonFileHistory::open(&dir)
        .await
        .with_context(|| format!("Failed to open history directory: {}", dir.display()))?;
    tracing::info!(path = %dir.display(), "history store ready");
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(ponder_settings::settings_path);
    let mut settings = ponder_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings after CLI overrides")?;

    init_logging(&settings);
    let metrics = ponder_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let history = open_history(&settings).await?;
    let broker = SessionBroker::new(BrokerConfig::from(&settings.broker), history);

    if settings.models.api_key.as_deref().is_none_or(str::is_empty) {
        tracing::warn!("no GOOGLE_API_KEY configured, session creation will fail until one is set");
    }
    let models: Arc<dyn ModelProvider> = Arc::new(GeminiProvider::new(settings.models.clone()));
    let tools = Arc::new(ToolRegistry::new());
    tracing::debug!(tool_count = tools.len(), "tool registry created");

    let service = SessionService::new(
        broker,
        models,
        tools,
        SessionServiceConfig::from(&settings),
    );
    let server = PonderServer::new(ServerConfig::from(&settings), service).with_metrics(metrics);

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    tracing::info!(
        default_model = settings.models.default_model.as_str(),
        max_sessions = settings.broker.max_active_sessions,
        "Ponder listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let timeout = server.config().shutdown_timeout;
    server
        .shutdown()
        .graceful_shutdown(server.service(), handle, Some(timeout))
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}
