//! Axum HTTP surface: client API, engine callbacks, and the WebSocket hub.
//!
//! Callback routes acknowledge 200 no matter what happened internally. The
//! engine delivers each callback exactly once with no retry of its own, so
//! failing the response would lose the only delivery attempt; internal
//! failures are logged instead.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::channels::ws::{WsHub, run_connection};
use crate::engine::workitem::ParamsDocument;
use crate::error::{ChannelError, SessionError};
use crate::orchestrator::{DataKind, Orchestrator, StartJobsRequest, StartJobsResponse};

/// Shared state for all handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub hub: Arc<WsHub>,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/jobs", post(start_jobs_handler))
        .route("/api/ws", get(ws_handler))
        .route("/callback/ondata/{kind}", put(on_data_handler))
        .route("/callback/oncomplete", post(on_complete_handler))
        .route("/data", get(data_handler))
        // The browser client is typically served from a different origin
        // than the public callback surface.
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<(), ChannelError> {
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ChannelError::StartupFailed {
                reason: format!("Failed to bind to {addr}: {e}"),
            })?;

    tracing::info!(%addr, "Server listening");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| ChannelError::StartupFailed {
            reason: e.to_string(),
        })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

async fn start_jobs_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartJobsRequest>,
) -> Result<Json<StartJobsResponse>, (StatusCode, String)> {
    let client_id = req.client_id.clone();
    state.orchestrator.start_jobs(req).await.map(Json).map_err(|e| {
        tracing::error!(client_id, error = %e, "Failed to start jobs");
        (StatusCode::BAD_GATEWAY, e.to_string())
    })
}

#[derive(Deserialize)]
struct CallbackQuery {
    id: String,
    #[serde(rename = "outputFile", default)]
    output_file: Option<String>,
}

async fn on_data_handler(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(query): Query<CallbackQuery>,
    body: axum::body::Bytes,
) -> StatusCode {
    match DataKind::parse(&kind) {
        Some(kind) => {
            state
                .orchestrator
                .on_data(&query.id, kind, body.to_vec())
                .await;
        }
        None => {
            tracing::warn!(client_id = %query.id, kind, "Unknown data callback kind");
        }
    }
    StatusCode::OK
}

async fn on_complete_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    body: String,
) -> StatusCode {
    let output_file = query.output_file.unwrap_or_default();
    state
        .orchestrator
        .on_complete(&query.id, &output_file, &body)
        .await;
    StatusCode::OK
}

#[derive(Deserialize)]
struct DataQuery {
    id: String,
}

/// Session pull: suspends until the client hands off its next parameters.
async fn data_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DataQuery>,
) -> Result<Json<ParamsDocument>, StatusCode> {
    match state.orchestrator.next_input(&query.id).await {
        Ok(doc) => Ok(Json(doc)),
        Err(SessionError::PollTimeout { client_id, waited }) => {
            tracing::warn!(client_id, waited_secs = waited.as_secs(), "Session pull timed out");
            Err(StatusCode::NO_CONTENT)
        }
        Err(SessionError::Closed { client_id }) => {
            tracing::info!(client_id, "Session pull on a closed session");
            Err(StatusCode::NO_CONTENT)
        }
    }
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| run_connection(socket, hub))
}
