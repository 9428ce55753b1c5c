//! Build session handlers, including the SSE turn endpoint.
//!
//! POST /api/v1/projects/{id}/build/stream
//!
//! Runs one turn of the build loop and streams it as Server-Sent Events.
//! Every check that can reject the turn happens before the stream opens;
//! after that, failures arrive as an `error` event.
//!
//! SSE event types:
//! - `text`: incremental assistant text: `{ "delta": "..." }`
//! - `advisor`: an advisor consultation: `{ "advisor": "...", "content": "..." }`
//! - `end`: exactly one per completed turn: `{ "signal": { "type": ..., ... } }`
//! - `error`: the turn failed mid-stream: `{ "message": "..." }`

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;

use pagewright_core::build::signal::determine_signal;
use pagewright_core::build::store::BuildSessionStore;
use pagewright_types::build::{BuildEvent, BuildSession, BuildTurnRequest, StreamEndSignal};
use pagewright_types::conversation::ConversationTurn;
use pagewright_types::error::RepositoryError;

use crate::http::error::AppError;
use crate::http::handlers::project::{find_project, parse_project_id};
use crate::http::response::ApiResponse;
use crate::state::AppState;
use crate::turn::{EVENT_BUFFER, prepare_turn, run_prepared};

/// Session plus the signal a turn would end with right now.
#[derive(Debug, Serialize)]
pub struct BuildStatus {
    pub session: BuildSession,
    pub signal: StreamEndSignal,
}

/// GET /api/v1/projects/{id}/build - Current build session.
pub async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<BuildStatus>>, AppError> {
    let start = Instant::now();
    let project = find_project(&state, &id).await?;

    let session = state
        .sessions
        .load_session(&project.id)
        .await?
        .ok_or(RepositoryError::NotFound)?;
    let signal = determine_signal(&session);

    let id = project.id;
    Ok(Json(
        ApiResponse::success(BuildStatus { session, signal }, start)
            .with_link("self", format!("/api/v1/projects/{id}/build"))
            .with_link("stream", format!("/api/v1/projects/{id}/build/stream"))
            .with_link("history", format!("/api/v1/projects/{id}/build/history")),
    ))
}

/// POST /api/v1/projects/{id}/build/stream - Run one turn as SSE.
pub async fn stream_build(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<BuildTurnRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(request) = body.map_err(|e| AppError::Validation(e.body_text()))?;
    let project_id = parse_project_id(&id)?;
    let turn = prepare_turn(&state, &project_id, &request).await?;

    tracing::info!(
        %project_id,
        turn = ?request,
        step = turn.session.current_step,
        "build turn accepted"
    );

    let (tx, rx) = mpsc::channel::<BuildEvent>(EVENT_BUFFER);
    tokio::spawn(run_prepared(turn, tx));

    let stream = ReceiverStream::new(rx).map(|event| Ok(sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// DELETE /api/v1/projects/{id}/build - Reset the session and its history.
pub async fn reset_build(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let project = find_project(&state, &id).await?;

    state.sessions.delete_session(&project.id).await?;
    state.sessions.delete_history(&project.id).await?;
    tracing::info!(project_id = %project.id, "build reset");

    Ok(Json(ApiResponse::success(
        serde_json::json!({"reset": true, "project_id": project.id}),
        start,
    )))
}

/// GET /api/v1/projects/{id}/build/history - Full persisted conversation.
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<ConversationTurn>>>, AppError> {
    let start = Instant::now();
    let project = find_project(&state, &id).await?;

    let history = state.sessions.load_history(&project.id).await?;
    Ok(Json(ApiResponse::success(history.turns().to_vec(), start)))
}

/// GET /api/v1/projects/{id}/deployment - Poll target for the deploy stage.
///
/// Returns the `deployment` artifact once the site is published, otherwise
/// `{ "status": "pending" }`.
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let project = find_project(&state, &id).await?;

    let deployment = state
        .sessions
        .load_session(&project.id)
        .await?
        .and_then(|session| session.artifacts.get("deployment").cloned())
        .unwrap_or_else(|| serde_json::json!({"status": "pending"}));

    Ok(Json(ApiResponse::success(deployment, start)))
}

/// Frame a build event as SSE: event name plus its JSON payload.
pub fn sse_event(event: &BuildEvent) -> Event {
    let payload = match event {
        BuildEvent::TextDelta { delta } => serde_json::json!({ "delta": delta }),
        BuildEvent::AdvisorSegment { advisor, content } => {
            serde_json::json!({ "advisor": advisor, "content": content })
        }
        BuildEvent::End { signal } => serde_json::json!({ "signal": signal }),
        BuildEvent::Error { message } => serde_json::json!({ "message": message }),
    };
    Event::default()
        .event(event.event_name())
        .data(payload.to_string())
}
