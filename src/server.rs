//! Webhook HTTP surface.
//!
//! `POST /webhook/fireflies` turns a transcription-completed notification
//! into a pipeline run and answers with the run summary. `GET /health`
//! is a liveness check.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::PipelineError;
use crate::pipeline::Orchestrator;
use crate::pipeline::types::MeetingEvent;

/// Header carrying the shared webhook secret.
pub const SECRET_HEADER: &str = "fireflies-webhook-secret";

/// Shared state for webhook routes.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<ServerConfig>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default, rename = "meetingId", alias = "meeting_id", alias = "id")]
    meeting_id: Option<String>,
    #[serde(default, rename = "eventType", alias = "event_type")]
    event_type: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// POST /webhook/fireflies
async fn fireflies_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(expected) = &state.config.webhook_secret {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected.expose_secret()) {
            warn!("Webhook rejected: bad or missing secret");
            return error_response(StatusCode::UNAUTHORIZED, None, "invalid webhook secret");
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Webhook body is not valid JSON");
            return error_response(StatusCode::BAD_REQUEST, None, "invalid JSON body");
        }
    };

    let Some(meeting_id) = payload
        .meeting_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
    else {
        warn!("Webhook payload missing meeting id");
        return error_response(StatusCode::BAD_REQUEST, None, "missing meeting id");
    };

    if let Some(event_type) = payload.event_type.as_deref()
        && event_type != state.config.accepted_event
    {
        info!(meeting_id = %meeting_id, event_type = %event_type, "Skipping webhook event");
        return (StatusCode::OK, Json(json!({"status": "skipped"}))).into_response();
    }

    let event = MeetingEvent::new(meeting_id, payload.title.unwrap_or_default());
    match state.orchestrator.run(&event).await {
        Ok(report) => {
            let summary = report.summary();
            (
                StatusCode::OK,
                Json(json!({
                    "status": summary.status,
                    "item_url": summary.item_url,
                    "failed_subitem_count": summary.failed_subitem_count,
                    "warnings": report.warnings(),
                    "run_id": report.run_id,
                })),
            )
                .into_response()
        }
        Err(err) => {
            let (status, stage) = failure_status(&err);
            error_response(status, Some(stage), &err.to_string())
        }
    }
}

/// HTTP status and stage label for a terminal pipeline error.
fn failure_status(err: &PipelineError) -> (StatusCode, &'static str) {
    match err {
        PipelineError::Fetch(_) => (StatusCode::BAD_GATEWAY, "fetch"),
        PipelineError::Dispatch(_) => (StatusCode::BAD_GATEWAY, "dispatch"),
        PipelineError::Stage { stage, .. } => (StatusCode::INTERNAL_SERVER_ERROR, stage.label()),
    }
}

fn error_response(status: StatusCode, stage: Option<&str>, message: &str) -> Response {
    let mut body = json!({"status": "error", "message": message});
    if let Some(stage) = stage {
        body["stage"] = json!(stage);
    }
    (status, Json(body)).into_response()
}

/// Build the webhook routes.
pub fn webhook_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook/fireflies", post(fireflies_webhook))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
