//! Model management endpoints: registry passthrough and pull tasks

use axum::{
    Json,
    extract::{
        Path, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{StreamExt, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use utoipa::ToSchema;

use super::experiments::{client_is_gone, send_frame};
use super::{CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_NOT_FOUND, WsSender, close_with};
use crate::api::state::AppState;
use crate::error::{Error, Result};
use crate::types::{PullTask, StreamFrame};

/// Request body for starting a model pull
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PullRequest {
    /// Registry model name (e.g. "llama3.2")
    pub model: String,
}

/// Response for a started pull
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PullStarted {
    /// Id of the background pull task
    pub task_id: String,
}

/// GET /models - List registry models
#[utoipa::path(
    get,
    path = "/models",
    responses(
        (status = 200, description = "Registry tag listing (cached briefly)"),
        (status = 502, description = "Registry unreachable")
    )
)]
pub async fn list_models(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    Ok(Json(state.hub.registry().tags().await?))
}

/// GET /models/version - Registry version
#[utoipa::path(
    get,
    path = "/models/version",
    responses(
        (status = 200, description = "Registry version (cached briefly)"),
        (status = 502, description = "Registry unreachable")
    )
)]
pub async fn registry_version(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    Ok(Json(state.hub.registry().version().await?))
}

/// GET /models/:name - Show model details
#[utoipa::path(
    get,
    path = "/models/{name}",
    params(("name" = String, Path, description = "Model name")),
    responses(
        (status = 200, description = "Model details"),
        (status = 502, description = "Registry error or unreachable")
    )
)]
pub async fn show_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    Ok(Json(state.hub.registry().show(&name).await?))
}

/// DELETE /models/:name - Delete a model from the registry
#[utoipa::path(
    delete,
    path = "/models/{name}",
    params(("name" = String, Path, description = "Model name")),
    responses(
        (status = 204, description = "Model deleted"),
        (status = 502, description = "Registry error or unreachable")
    )
)]
pub async fn delete_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    state.hub.registry().delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /models/pull - Start a background model pull
#[utoipa::path(
    post,
    path = "/models/pull",
    request_body = PullRequest,
    responses(
        (status = 202, description = "Pull task registered and started", body = PullStarted),
        (status = 400, description = "Empty model name")
    )
)]
pub async fn start_pull(
    State(state): State<AppState>,
    Json(request): Json<PullRequest>,
) -> Result<impl IntoResponse> {
    let model = request.model.trim();
    if model.is_empty() {
        return Err(Error::Validation("model name must not be empty".to_string()));
    }

    let task_id = state.hub.pulls().pull(model);
    Ok((StatusCode::ACCEPTED, Json(PullStarted { task_id })))
}

/// GET /models/pull - List pull tasks
#[utoipa::path(
    get,
    path = "/models/pull",
    responses(
        (status = 200, description = "All known pull tasks, newest first", body = Vec<PullTask>)
    )
)]
pub async fn list_pull_tasks(State(state): State<AppState>) -> Json<Vec<PullTask>> {
    Json(state.hub.pulls().list())
}

/// GET /models/pull/:task_id - Get one pull task
#[utoipa::path(
    get,
    path = "/models/pull/{task_id}",
    params(("task_id" = String, Path, description = "Pull task id")),
    responses(
        (status = 200, description = "The pull task", body = PullTask),
        (status = 404, description = "Unknown task (possibly removed by retention cleanup)")
    )
)]
pub async fn get_pull_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<PullTask>> {
    state
        .hub
        .pulls()
        .get(&task_id)
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("pull task {task_id}")))
}

/// POST /models/pull/:task_id/cancel - Cancel a pull task
#[utoipa::path(
    post,
    path = "/models/pull/{task_id}/cancel",
    params(("task_id" = String, Path, description = "Pull task id")),
    responses(
        (status = 202, description = "Task cancelled"),
        (status = 400, description = "Task already terminal"),
        (status = 404, description = "Unknown task")
    )
)]
pub async fn cancel_pull_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse> {
    let pulls = state.hub.pulls();
    if pulls.cancel(&task_id) {
        return Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "cancelled"})),
        ));
    }

    match pulls.get(&task_id) {
        Some(task) => Err(Error::Validation(format!(
            "pull task {task_id} is already {}",
            task.status.as_str()
        ))),
        None => Err(Error::NotFound(format!("pull task {task_id}"))),
    }
}

/// GET /models/pull/:task_id/stream - WebSocket stream of pull progress
///
/// Sends the task snapshot as `{"type": "status", "data": {...}}` frames:
/// immediately on connect, on every throttled progress emission, and once
/// more (with `final: true`) on the terminal transition.
#[utoipa::path(
    get,
    path = "/models/pull/{task_id}/stream",
    params(("task_id" = String, Path, description = "Pull task id")),
    responses(
        (status = 101, description = "Switching protocols to the progress stream")
    )
)]
pub async fn stream_pull_task(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| relay_pull(state, task_id, socket))
}

fn task_frame(task: &PullTask) -> StreamFrame {
    if task.status.is_terminal() {
        StreamFrame::final_status(serde_json::json!(task))
    } else {
        StreamFrame::status(serde_json::json!(task))
    }
}

async fn relay_pull(state: AppState, task_id: String, socket: WebSocket) {
    let pulls = state.hub.pulls().clone();
    let poll = state.hub.experiments().poll_interval();
    let (mut sender, mut ws_rx) = socket.split();

    // Bridge the callback fan-out into a queue this relay drains
    let (tx, mut rx) = mpsc::unbounded_channel::<PullTask>();
    let subscribed = pulls.subscribe(
        &task_id,
        Arc::new(move |task| {
            let _ = tx.send(task.clone());
        }),
    );
    if !subscribed {
        close_with(&mut sender, CLOSE_NOT_FOUND, "pull task not found").await;
        return;
    }

    // Current snapshot first, so late subscribers see where things stand
    let Some(task) = pulls.get(&task_id) else {
        close_with(&mut sender, CLOSE_NOT_FOUND, "pull task not found").await;
        return;
    };
    let frame = task_frame(&task);
    match send_frame(&mut sender, &frame).await {
        Ok(true) if !frame.is_terminal() => {}
        Ok(_) => {
            close_with(&mut sender, CLOSE_NORMAL, "stream complete").await;
            return;
        }
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "Pull stream relay failed");
            close_with(&mut sender, CLOSE_INTERNAL_ERROR, "internal error").await;
            return;
        }
    }

    let outcome = relay_pull_loop(&pulls, &task_id, &mut rx, poll, &mut sender, &mut ws_rx).await;
    match outcome {
        Ok(()) => close_with(&mut sender, CLOSE_NORMAL, "stream complete").await,
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "Pull stream relay failed");
            close_with(&mut sender, CLOSE_INTERNAL_ERROR, "internal error").await;
        }
    }
}

async fn relay_pull_loop(
    pulls: &crate::pull::PullManager,
    task_id: &str,
    rx: &mut mpsc::UnboundedReceiver<PullTask>,
    poll: std::time::Duration,
    sender: &mut WsSender,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<()> {
    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                if client_is_gone(incoming) {
                    return Ok(());
                }
            }
            polled = tokio::time::timeout(poll, rx.recv()) => {
                match polled {
                    Ok(Some(task)) => {
                        let frame = task_frame(&task);
                        let terminal = frame.is_terminal();
                        if !send_frame(sender, &frame).await? || terminal {
                            return Ok(());
                        }
                    }
                    Ok(None) => return Ok(()),
                    Err(_) => {
                        // Quiet interval: re-check the task in case its
                        // terminal emission raced past the subscription
                        match pulls.get(task_id) {
                            Some(task) if task.status.is_terminal() => {
                                send_frame(sender, &task_frame(&task)).await?;
                                return Ok(());
                            }
                            Some(_) => {}
                            // Removed by retention cleanup
                            None => return Ok(()),
                        }
                    }
                }
            }
        }
    }
}
