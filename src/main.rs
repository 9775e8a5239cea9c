#![allow(missing_docs)]

//! Sabai — conversational NCD health-triage assistant.
//!
//! Binary entry point: loads configuration, opens the session store
//! (startup-fatal on failure), wires the engine, and serves the HTTP API.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use sabai::config::SabaiConfig;
use sabai::engine::{ConversationEngine, EngineSettings};
use sabai::logging;
use sabai::notify::Notifier;
use sabai::providers::gemini::GeminiBackend;
use sabai::providers::GenerativeBackend;
use sabai::retrieval::FtsIndex;
use sabai::server::{self, AppState};
use sabai::store::SessionStore;

#[derive(Parser)]
#[command(name = "sabai", about = "Conversational NCD health-triage assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default).
    Serve,
    /// Load knowledge-base passages from a UTF-8 text file.
    ///
    /// Paragraphs (blank-line separated) become individual passages.
    Ingest {
        /// Path to the passage file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = SabaiConfig::load().context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Ingest { file } => {
            let _log_guard = logging::init(None)?;
            ingest(&config, &file).await
        }
    }
}

/// Run the HTTP service.
///
/// Failure to open the session store or build the backend is unrecoverable
/// and aborts startup; per-turn failures are handled inside the engine.
async fn serve(config: SabaiConfig) -> Result<()> {
    let _log_guard = logging::init(Some(Path::new(&config.store.logs_dir)))?;
    info!("sabai starting");

    let store = SessionStore::connect(&config.store.db_path)
        .await
        .context("failed to open session store")?;

    let api_key = config
        .llm
        .api_key
        .as_deref()
        .context("generative backend API key missing: set SABAI_GEMINI_API_KEY or [llm].api_key")?;
    let backend = GeminiBackend::new(
        &config.llm.base_url,
        &config.llm.model,
        api_key,
        Duration::from_secs(config.llm.timeout_seconds),
    )
    .context("failed to build generative backend")?;
    info!(model = backend.model_id(), "generative backend ready");

    let index = FtsIndex::new(store.pool().clone());

    let settings = EngineSettings {
        history_window: config.engine.history_window,
        risk_interval: config.engine.risk_interval,
        retrieval_fan_out: config.retrieval.fan_out,
    };
    let engine = ConversationEngine::new(Arc::new(backend), Arc::new(index), store, settings);
    let notifier = Notifier::new(
        config.notify.endpoint.clone(),
        config.notify.auth_token.clone(),
    );

    let state = Arc::new(AppState { engine, notifier });
    let app = server::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("sabai shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received shutdown signal");
}

/// Load knowledge-base passages into the FTS index.
async fn ingest(config: &SabaiConfig, file: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let store = SessionStore::connect(&config.store.db_path)
        .await
        .context("failed to open session store")?;
    let index = FtsIndex::new(store.pool().clone());

    let source = file.display().to_string();
    let mut loaded: u64 = 0;
    for paragraph in contents.split("\n\n") {
        let passage = paragraph.trim();
        if passage.is_empty() {
            continue;
        }
        index
            .add_passage(passage, Some(&source))
            .await
            .context("failed to insert passage")?;
        loaded = loaded.saturating_add(1);
    }

    let total = index
        .passage_count()
        .await
        .context("failed to count passages")?;
    info!(loaded, total, "knowledge base updated");
    Ok(())
}
