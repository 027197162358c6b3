use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, body::Body, http::Request};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState, SharedState};
use super::auth::TokenSigner;
use super::db::{DbHandle, TrackerDb};
use super::ws::CHANNEL_CAPACITY;
use crate::config::Config;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub token_secret: Option<String>,
    pub token_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            db_path: PathBuf::from(".kartavya/kartavya.db"),
            dev_mode: false,
            token_secret: None,
            token_ttl_secs: 86_400,
        }
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            db_path: config.db_path.clone(),
            dev_mode: config.dev_mode,
            token_secret: config.token_secret.clone(),
            token_ttl_secs: config.token_ttl_secs,
        }
    }
}

/// Open the database at `path`, creating the parent directory if needed.
pub fn open_database(path: &Path) -> Result<TrackerDb> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    TrackerDb::new(path).context("Failed to initialize tracker database")
}

/// Build the full application router: API, WebSocket, request tracing and,
/// in dev mode, permissive CORS.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let trace = TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
        tracing::info_span!(
            "request",
            method = %req.method(),
            uri = %req.uri(),
            user_id = tracing::field::Empty,
        )
    });

    let app = api::api_router(state).layer(trace);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

fn build_state(config: &ServerConfig, db: TrackerDb) -> SharedState {
    let signer = match &config.token_secret {
        Some(secret) => TokenSigner::new(secret.as_bytes().to_vec(), config.token_ttl_secs),
        None => {
            tracing::warn!("No token secret configured; sessions will not survive a restart");
            TokenSigner::ephemeral(config.token_ttl_secs)
        }
    };
    let (ws_tx, _rx) = broadcast::channel::<String>(CHANNEL_CAPACITY);
    Arc::new(AppState {
        db: DbHandle::new(db),
        ws_tx,
        signer,
    })
}

/// Start the server and run until Ctrl-C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let db = open_database(&config.db_path)?;
    let state = build_state(&config, db);
    let app = build_router(state, config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr: SocketAddr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        db = %config.db_path.display(),
        dev_mode = config.dev_mode,
        "Kartavya listening"
    );
    println!("Kartavya running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
