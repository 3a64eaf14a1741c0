//! HTTP server.
//!
//! Provides `/health` and `/imagefly/{params}/{*source}`.
//!
//! The orchestrator blocks on file I/O and pixel work, so each request runs
//! on tokio's blocking pool. A build that has started finishes and is cached
//! even if the client goes away.

use crate::cache::CacheStats;
use crate::error::RequestError;
use crate::imaging::RustBackend;
use crate::service::{Imagefly, Served, TransformRequest};
use axum::{
    Router,
    body::Body,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub service: Imagefly<RustBackend>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(service: Imagefly<RustBackend>) -> Self {
        Self {
            service,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/imagefly/{params}/{*source}", get(transform))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until ctrl-c.
pub async fn start_server(state: SharedState, addr: SocketAddr) -> std::io::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = u64::try_from((Utc::now() - state.started_at).num_seconds()).unwrap_or(0);
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: state.service.stats(),
    })
}

async fn transform(
    State(state): State<SharedState>,
    Path((params, source)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let if_modified_since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let task_state = Arc::clone(&state);
    let (task_params, task_source) = (params.clone(), source.clone());
    let result = tokio::task::spawn_blocking(move || {
        let request = TransformRequest {
            params: &task_params,
            source: &task_source,
            query: query.as_deref(),
            if_modified_since: if_modified_since.as_deref(),
        };
        task_state.service.handle(&request, Utc::now())
    })
    .await;

    match result {
        Ok(Ok(served)) => served_response(served),
        Ok(Err(e)) => request_error_response(&params, &source, e),
        Err(e) => {
            error!(params = %params, source = %source, error = %e, "Request task failed");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    }
}

fn served_response(served: Served) -> Response {
    let Served { response, artifact } = served;
    let status = StatusCode::from_u16(response.status.code()).unwrap_or(StatusCode::OK);

    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(*name, value);
    }
    builder
        .header("X-Cache", artifact.outcome.header_value())
        .body(Body::from(response.body))
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to assemble response");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        })
}

fn request_error_response(params: &str, source: &str, e: RequestError) -> Response {
    if e.is_client_error() {
        debug!(params = %params, source = %source, error = %e, "Rejected request");
    } else {
        error!(params = %params, source = %source, error = %e, "Request failed");
    }
    let status = StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_json(status, e.to_string())
}

fn error_json(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}
