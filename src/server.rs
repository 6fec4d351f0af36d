//! HTTP server exposing the batch endpoint.
//!
//! Routes:
//! - `POST /v1/batch`: run a `BatchRequest`, answer with a `BatchResponse`
//! - `GET /health`: liveness probe

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::signal;
use tracing::info;

use crate::core::{BatchError, BatchRequest, BatchResponse, BatchRunner};

/// Error body returned by the API
#[derive(Debug)]
pub struct ApiError(BatchError);

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_code = match &self.0 {
            BatchError::Empty => "EMPTY_BATCH",
            BatchError::TooManyJobs { .. } => "BATCH_TOO_LARGE",
            BatchError::DuplicateJobId(_) => "DUPLICATE_JOB_ID",
            BatchError::UnsupportedKind { .. } => "UNSUPPORTED_KIND",
        };

        let body = json!({
            "success": false,
            "error": self.0.to_string(),
            "error_code": error_code,
        });

        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

/// Create all routes
pub fn router(runner: Arc<BatchRunner>) -> Router {
    Router::new()
        .route("/v1/batch", post(batch_handler))
        .route("/health", get(health_handler))
        .with_state(runner)
}

/// POST /v1/batch
async fn batch_handler(
    State(runner): State<Arc<BatchRunner>>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    Ok(Json(runner.run(request).await?))
}

/// GET /health
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Serve until Ctrl-C
pub async fn serve(address: SocketAddr, runner: BatchRunner) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    info!("HTTP server listening on http://{}", address);

    axum::serve(listener, router(Arc::new(runner)))
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            info!("Received Ctrl+C signal");
        })
        .await
        .context("HTTP server failed")?;

    info!("Server shutdown complete");
    Ok(())
}
