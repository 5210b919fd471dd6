//! HTTP surface: AG-UI runs over SSE, plus stop and health endpoints

pub mod sse;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::protocol::EventEncoder;
use crate::run::controller::new_id;
use crate::run::{ResearchService, RunRegistry, RunRequest};
use sse::{sse_body_stream, sse_response};

/// Header carrying the id to use with the stop endpoint
pub const RUN_ID_HEADER: &str = "x-run-id";

#[derive(Clone)]
pub struct AppState {
    pub service: ResearchService,
    pub registry: Arc<RunRegistry>,
}

impl AppState {
    pub fn new(service: ResearchService) -> Self {
        Self {
            service,
            registry: Arc::new(RunRegistry::new()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("run already active: {0}")]
    RunConflict(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::RunNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RunConflict(_) => StatusCode::CONFLICT,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (code, body).into_response()
    }
}

/// Build the HTTP routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/run", post(run))
        .route("/langgraph-research", post(run))
        .route("/runs/{run_id}/stop", post(stop))
        .route("/health", get(health))
        .with_state(state)
}

async fn run(
    State(st): State<AppState>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(mut request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    // Claim the id before the run starts
    let run_id = request.run_id.get_or_insert_with(new_id).clone();
    let cancel = CancellationToken::new();
    if !st.registry.register(run_id.clone(), cancel.clone()).await {
        warn!(run_id = %run_id, "Refusing a second live run with the same id");
        return Err(ApiError::RunConflict(run_id));
    }
    let handle = st.service.start_run(request, cancel.clone());

    let registry = Arc::clone(&st.registry);
    let task = handle.task;
    let finished_id = run_id.clone();
    tokio::spawn(async move {
        match task.await {
            Ok(summary) => debug!(run_id = %finished_id, ?summary, "Run task ended"),
            Err(e) => error!(run_id = %finished_id, error = %e, "Run task panicked"),
        }
        registry.remove(&finished_id).await;
    });

    let stream = sse_body_stream(handle.events, EventEncoder::new(), cancel.drop_guard());
    let mut response = sse_response(stream);
    if let Ok(value) = HeaderValue::from_str(&run_id) {
        response.headers_mut().insert(RUN_ID_HEADER, value);
    }
    Ok(response)
}

async fn stop(
    State(st): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Response, ApiError> {
    if !st.registry.stop(&run_id).await {
        return Err(ApiError::RunNotFound(run_id));
    }
    info!(run_id = %run_id, "Stop requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "stopping", "runId": run_id })),
    )
        .into_response())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Serve until Ctrl-C
pub async fn serve(config: &Config, service: ResearchService) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let app = router(AppState::new(service));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "AG-UI endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
