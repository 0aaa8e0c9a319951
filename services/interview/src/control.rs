//! HTTP/WebSocket control surface for a running session.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use interview_core::{ReportStatus, SessionController, SessionError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

type SharedController = Arc<SessionController>;

#[derive(Debug, Serialize)]
struct SessionView {
    session_id: Option<String>,
    lifecycle: String,
    outcome: &'static str,
}

#[derive(Debug, Deserialize)]
struct EndRequest {
    #[serde(default = "default_manual")]
    manual: bool,
}

fn default_manual() -> bool {
    true
}

fn outcome_name(status: &ReportStatus) -> &'static str {
    match status {
        ReportStatus::NoReport => "no_report",
        ReportStatus::AggregationPending => "aggregation_pending",
        ReportStatus::Resolved(_) => "resolved",
    }
}

/// Builds the control router with a permissive CORS policy, so a separate
/// frontend can reach it.
pub fn router(controller: SharedController) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/session", get(session_view))
        .route("/session/start", post(start_session))
        .route("/session/end", post(end_session))
        .route("/session/results", get(session_results))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(controller)
}

/// Serves the control API on `address` until `shutdown` fires.
pub async fn serve(
    address: SocketAddr,
    controller: SharedController,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Control API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(controller))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn session_view(State(controller): State<SharedController>) -> Json<SessionView> {
    Json(SessionView {
        session_id: controller.state().session_id().map(|id| id.to_string()),
        lifecycle: controller.lifecycle().to_string(),
        outcome: outcome_name(&controller.outcome()),
    })
}

async fn start_session(State(controller): State<SharedController>) -> Response {
    match controller.start().await {
        Ok(session_id) => Json(json!({ "session_id": session_id })).into_response(),
        Err(e) => {
            let status = match e {
                SessionError::ResourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                SessionError::InvalidTransition { .. } => StatusCode::CONFLICT,
            };
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn end_session(
    State(controller): State<SharedController>,
    Json(request): Json<EndRequest>,
) -> Json<serde_json::Value> {
    let status = controller.end(request.manual).await;
    Json(json!({ "outcome": outcome_name(&status) }))
}

async fn session_results(State(controller): State<SharedController>) -> Response {
    match controller.outcome() {
        ReportStatus::Resolved(results) => Json(results.as_ref().clone()).into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No results available" })),
        )
            .into_response(),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(controller): State<SharedController>,
) -> Response {
    debug!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| stream_events(socket, controller))
}

/// Forwards every `SessionEvent` as a JSON text frame until the client leaves.
async fn stream_events(socket: WebSocket, controller: SharedController) {
    info!("WebSocket connection established");
    let mut events = controller.subscribe();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    info!("WebSocket connection closed");
}
