//! HTTP status surface for a running bootstrap.
//!
//! Serves the checkpoint history, the command audit log and, once the
//! permanent cluster exists, its kubeconfig.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use capv_common::{Event, EventKind};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;

/// Default bind address
pub const DEFAULT_STATUS_ADDR: &str = "0.0.0.0:8081";

/// Body of `GET /progress`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Set once the run succeeded
    pub complete: bool,
    /// Set once the run failed
    pub failed: bool,
    /// Checkpoint messages so far, oldest first
    pub messages: Vec<String>,
}

/// Shared view of a run, fed from the event bus
#[derive(Clone)]
pub struct StatusBoard {
    progress: Arc<RwLock<Progress>>,
    log_file: Option<PathBuf>,
    kubeconfig: PathBuf,
}

impl StatusBoard {
    /// Empty board; `/logs` and `/kubeconfig` read from these paths
    pub fn new(log_file: Option<PathBuf>, kubeconfig: PathBuf) -> Self {
        Self {
            progress: Arc::new(RwLock::new(Progress::default())),
            log_file,
            kubeconfig,
        }
    }

    /// Keep checkpoint messages; progress events are only logged
    pub fn record(&self, event: &Event) {
        if event.kind == EventKind::Checkpoint {
            self.progress.write().messages.push(event.message.clone());
        }
    }

    /// Record a successful run
    pub fn mark_complete(&self) {
        self.progress.write().complete = true;
    }

    /// Record a failed run
    pub fn mark_failed(&self) {
        self.progress.write().failed = true;
    }

    /// Copy of the current progress
    pub fn snapshot(&self) -> Progress {
        self.progress.read().clone()
    }
}

/// `/progress`, `/logs`, `/kubeconfig` and `/healthz`
pub fn status_routes(board: StatusBoard) -> Router {
    Router::new()
        .route("/progress", get(progress))
        .route("/logs", get(logs))
        .route("/kubeconfig", get(kubeconfig))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(board)
}

/// Serve until `cancel` fires
pub async fn serve(addr: SocketAddr, board: StatusBoard, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "status server started");
    axum::serve(listener, status_routes(board))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    debug!(addr = %addr, "status server stopped");
    Ok(())
}

async fn progress(State(board): State<StatusBoard>) -> Json<Progress> {
    Json(board.snapshot())
}

/// Raw audit log; empty when there is none yet
async fn logs(State(board): State<StatusBoard>) -> impl IntoResponse {
    let Some(path) = &board.log_file else {
        return (StatusCode::OK, String::new());
    };
    match tokio::fs::read(path).await {
        Ok(bytes) => (StatusCode::OK, String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (StatusCode::OK, String::new()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unable to read log file");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

async fn kubeconfig(State(board): State<StatusBoard>) -> impl IntoResponse {
    match tokio::fs::read_to_string(&board.kubeconfig).await {
        Ok(contents) if !contents.is_empty() => (StatusCode::OK, contents),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, String::new()),
    }
}
