//! Local API server: every request is handed to the background worker.

use std::future::Future;
use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fieldsync_core::{WorkerHandle, WorkerMessage};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::commands::common::CliEngine;
use crate::error::CliError;

const EVENT_CAPACITY: usize = 64;
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
struct ServeState {
    worker: WorkerHandle,
}

pub async fn run_serve(engine: CliEngine, bind_addr: SocketAddr) -> Result<(), CliError> {
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!("fieldsync listening on {}", listener.local_addr()?);
    serve_on(engine, listener, shutdown_signal()).await
}

/// Run the worker and the HTTP server until `shutdown` resolves.
pub async fn serve_on(
    engine: CliEngine,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), CliError> {
    let (handle, events) = WorkerHandle::channel(EVENT_CAPACITY);
    let app = app_router(handle.clone());

    let server = async {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;
        if handle.shutdown().await.is_err() {
            tracing::debug!("Worker already stopped");
        }
        result
    };

    let ((), result) = tokio::join!(engine.worker().run(events), server);
    Ok(result?)
}

fn app_router(worker: WorkerHandle) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/worker/messages", post(post_message))
        .route("/worker/connectivity", post(connectivity_restored))
        .fallback(forward)
        .layer(TraceLayer::new_for_http())
        .with_state(ServeState { worker })
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn post_message(
    State(state): State<ServeState>,
    Json(message): Json<WorkerMessage>,
) -> Response {
    match state.worker.post_message(message).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(error) => unavailable(&error),
    }
}

async fn connectivity_restored(State(state): State<ServeState>) -> Response {
    match state.worker.connectivity_restored().await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(error) => unavailable(&error),
    }
}

async fn forward(State(state): State<ServeState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(error) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response()
        }
    };

    let request = http::Request::from_parts(parts, bytes.to_vec());
    match state.worker.fetch(request).await {
        Ok(response) => response.map(Body::from),
        Err(error) => unavailable(&error),
    }
}

fn unavailable(error: &fieldsync_core::WorkerError) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": error.to_string() })),
    )
        .into_response()
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
