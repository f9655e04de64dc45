//! HTTP + WebSocket surface for the progression engine.

mod ws;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{ErrorKind, Outcome, ProgressionEngine};
use crate::lesson::model::{LessonId, Screenshot, StepOrder};
use crate::notify::PopupHub;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProgressionEngine>,
    /// Popup fan-out backing `/ws` and `/api/send-popup`.
    pub hub: Arc<PopupHub>,
}

/// Build the router with the screenshot, flow, popup and WebSocket routes.
pub fn routes(engine: Arc<ProgressionEngine>, hub: Arc<PopupHub>) -> Router {
    let state = AppState { engine, hub };

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .route("/api/screenshot", post(screenshot))
        .route("/api/flow", post(start_flow))
        .route("/api/progress/{user_id}", get(progress))
        .route("/api/send-popup", post(send_popup))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "lesson-guide"
    }))
}

// ── Screenshot events ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct ScreenshotRequest {
    user_id: Option<String>,
    lesson_id: Option<LessonId>,
    step_order: Option<StepOrder>,
    /// Base64 image, optionally as a `data:` URL.
    image: String,
    /// When present, run a one-shot check against this criterion instead.
    finish_criteria: Option<String>,
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

async fn screenshot(
    State(state): State<AppState>,
    Json(body): Json<ScreenshotRequest>,
) -> Response {
    let shot = Screenshot::from_base64(body.image);
    if shot.is_empty() {
        return bad_request("image is empty");
    }

    if let Some(criterion) = body.finish_criteria {
        return match state.engine.evaluate_once(&shot, &criterion).await {
            Ok(evaluation) => (StatusCode::OK, Json(json!(evaluation))).into_response(),
            Err(e) => {
                warn!(error = %e, "One-shot completion check failed");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({"error": e.to_string()})),
                )
                    .into_response()
            }
        };
    }

    let (Some(user_id), Some(lesson_id), Some(step_order)) =
        (body.user_id, body.lesson_id, body.step_order)
    else {
        return bad_request("user_id, lesson_id and step_order are required");
    };

    let outcome = state
        .engine
        .handle_event(&user_id, lesson_id, step_order, &shot)
        .await;
    (outcome_status(&outcome), Json(json!(outcome))).into_response()
}

fn outcome_status(outcome: &Outcome) -> StatusCode {
    match outcome {
        Outcome::NotFound { .. } => StatusCode::NOT_FOUND,
        Outcome::Error { kind, .. } => match kind {
            ErrorKind::Store => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Oracle => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::OK,
    }
}

// ── Flow ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct FlowRequest {
    lesson_id: LessonId,
    #[serde(default = "default_step")]
    step_order: StepOrder,
    image: String,
    user_id: Option<String>,
}

fn default_step() -> StepOrder {
    1
}

async fn start_flow(State(state): State<AppState>, Json(body): Json<FlowRequest>) -> Response {
    let shot = Screenshot::from_base64(body.image);
    if shot.is_empty() {
        return bad_request("image is empty");
    }

    let flow_id = Uuid::new_v4();
    let engine = Arc::clone(&state.engine);
    let FlowRequest {
        lesson_id,
        step_order,
        user_id,
        ..
    } = body;

    tokio::spawn(async move {
        let outcome = engine
            .run_flow(lesson_id, step_order, &shot, user_id.as_deref())
            .await;
        info!(flow_id = %flow_id, ?outcome, "Flow task done");
    });

    info!(flow_id = %flow_id, lesson_id, step_order, "Flow started");
    (
        StatusCode::ACCEPTED,
        Json(json!({"flow_id": flow_id, "status": "started"})),
    )
        .into_response()
}

// ── Progress ────────────────────────────────────────────────────────────

async fn progress(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.engine.user_state(&user_id).await {
        Some(progress) => (StatusCode::OK, Json(json!(progress))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No progress for user"})),
        )
            .into_response(),
    }
}

// ── Popup relay ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PopupRequest {
    message: String,
    user_id: Option<String>,
}

async fn send_popup(State(state): State<AppState>, Json(body): Json<PopupRequest>) -> Response {
    if body.message.trim().is_empty() {
        return bad_request("message is empty");
    }

    let delivered = state
        .hub
        .publish(&body.message, body.user_id.as_deref())
        .is_ok();
    if !delivered {
        info!(user_id = body.user_id.as_deref().unwrap_or("*"), "Popup relayed with no clients connected");
    }

    (
        StatusCode::OK,
        Json(json!({"status": "sent", "delivered": delivered})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_status_codes() {
        assert_eq!(
            outcome_status(&Outcome::Advanced { next_step: 2 }),
            StatusCode::OK
        );
        assert_eq!(
            outcome_status(&Outcome::NotFound {
                lesson_id: 1,
                step_order: 1
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            outcome_status(&Outcome::Error {
                kind: ErrorKind::Store,
                detail: String::new()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            outcome_status(&Outcome::Error {
                kind: ErrorKind::Oracle,
                detail: String::new()
            }),
            StatusCode::BAD_GATEWAY
        );
    }
}
