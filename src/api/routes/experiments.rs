//! Experiment endpoints, including the WebSocket stream

use axum::{
    Json,
    extract::{
        Path, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt, stream::SplitStream};
use tokio::sync::mpsc;

use super::{CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_NOT_FOUND, WsSender, close_with};
use crate::api::state::AppState;
use crate::error::{Error, Result};
use crate::experiment::ExperimentManager;
use crate::types::{
    Experiment, ExperimentId, ExperimentIndexEntry, NewExperiment, StreamFrame,
};

/// GET /experiments - List experiments
#[utoipa::path(
    get,
    path = "/experiments",
    responses(
        (status = 200, description = "Slim index of all experiments", body = Vec<ExperimentIndexEntry>)
    )
)]
pub async fn list_experiments(
    State(state): State<AppState>,
) -> Result<Json<Vec<ExperimentIndexEntry>>> {
    Ok(Json(state.hub.experiments().list()?))
}

/// POST /experiments - Create and start an experiment
#[utoipa::path(
    post,
    path = "/experiments",
    request_body = NewExperiment,
    responses(
        (status = 201, description = "Experiment created and run started", body = Experiment),
        (status = 400, description = "Invalid request (no agents, zero iterations, empty task)")
    )
)]
pub async fn create_experiment(
    State(state): State<AppState>,
    Json(request): Json<NewExperiment>,
) -> Result<impl IntoResponse> {
    let experiment = state.hub.experiments().create_and_start(request)?;
    Ok((StatusCode::CREATED, Json(experiment)))
}

/// GET /experiments/:id - Get the full experiment record
#[utoipa::path(
    get,
    path = "/experiments/{id}",
    params(("id" = String, Path, description = "Experiment id")),
    responses(
        (status = 200, description = "The experiment (live state while running)", body = Experiment),
        (status = 404, description = "Unknown experiment")
    )
)]
pub async fn get_experiment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Experiment>> {
    Ok(Json(state.hub.experiments().get(&ExperimentId::new(id))?))
}

/// DELETE /experiments/:id - Delete an experiment and all its snapshots
#[utoipa::path(
    delete,
    path = "/experiments/{id}",
    params(("id" = String, Path, description = "Experiment id")),
    responses(
        (status = 204, description = "Experiment deleted"),
        (status = 404, description = "Unknown experiment")
    )
)]
pub async fn delete_experiment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.hub.experiments().delete(&ExperimentId::new(id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /experiments/:id/cancel - Request cooperative cancellation
#[utoipa::path(
    post,
    path = "/experiments/{id}/cancel",
    params(("id" = String, Path, description = "Experiment id")),
    responses(
        (status = 202, description = "Cancellation signalled; the terminal frame follows on the stream"),
        (status = 404, description = "Unknown experiment"),
        (status = 409, description = "Experiment already terminal or not running")
    )
)]
pub async fn cancel_experiment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.hub.experiments().cancel(&ExperimentId::new(id))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"status": "cancelling"})),
    ))
}

/// GET /experiments/:id/stream - WebSocket stream of run events
///
/// Frames are JSON `{"type": "status"|"message"|"conversation", "data": ...}`;
/// the terminal status frame carries `final: true` and `close_connection:
/// true`. The connection closes with 4004 for unknown experiments, 1000 on
/// graceful completion and 1011 on unexpected failure.
#[utoipa::path(
    get,
    path = "/experiments/{id}/stream",
    params(("id" = String, Path, description = "Experiment id")),
    responses(
        (status = 101, description = "Switching protocols to the event stream")
    )
)]
pub async fn stream_experiment(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| relay_experiment(state, ExperimentId::new(id), socket))
}

/// The relay task: drain the experiment's event queue into the socket
async fn relay_experiment(state: AppState, id: ExperimentId, socket: WebSocket) {
    let manager = state.hub.experiments().clone();
    let poll = manager.poll_interval();
    let (mut sender, mut ws_rx) = socket.split();

    let receiver = match manager.take_stream(&id) {
        Ok(receiver) => receiver,
        Err(_) => {
            close_with(&mut sender, CLOSE_NOT_FOUND, "experiment not found").await;
            return;
        }
    };

    let outcome = match receiver {
        Some(mut rx) => relay_queue(&manager, &id, &mut rx, poll, &mut sender, &mut ws_rx).await,
        // The queue already has a consumer (or the run predates this
        // process): degrade to polling terminal status only
        None => relay_poll_only(&manager, &id, poll, &mut sender, &mut ws_rx).await,
    };

    match outcome {
        Ok(()) => close_with(&mut sender, CLOSE_NORMAL, "stream complete").await,
        Err(e) => {
            tracing::error!(experiment_id = %id, error = %e, "Stream relay failed");
            close_with(&mut sender, CLOSE_INTERNAL_ERROR, "internal error").await;
        }
    }
}

/// Forward every queued frame; on a quiet poll interval, re-check terminal
/// status so the stream can end even if the final frame raced past us
async fn relay_queue(
    manager: &ExperimentManager,
    id: &ExperimentId,
    rx: &mut mpsc::UnboundedReceiver<StreamFrame>,
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
                    Ok(Some(frame)) => {
                        let terminal = frame.is_terminal();
                        if !send_frame(sender, &frame).await? {
                            return Ok(());
                        }
                        if terminal {
                            return Ok(());
                        }
                    }
                    // Run handle dropped (experiment deleted mid-stream)
                    Ok(None) => return Ok(()),
                    Err(_) => {
                        if let Some(frame) = manager.terminal_frame(id)? {
                            send_frame(sender, &frame).await?;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

/// Degraded mode for late or duplicate consumers: only the terminal status is
/// observable
async fn relay_poll_only(
    manager: &ExperimentManager,
    id: &ExperimentId,
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
            _ = tokio::time::sleep(poll) => {
                match manager.terminal_frame(id) {
                    Ok(Some(frame)) => {
                        send_frame(sender, &frame).await?;
                        return Ok(());
                    }
                    Ok(None) => {}
                    // Deleted while we were watching
                    Err(Error::NotFound(_)) => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

/// Serialize and send one frame; `Ok(false)` means the client disconnected
pub(super) async fn send_frame(sender: &mut WsSender, frame: &StreamFrame) -> Result<bool> {
    let text = serde_json::to_string(frame)?;
    Ok(sender.send(WsMessage::Text(text)).await.is_ok())
}

/// Interpret the receive half: closes and errors end the relay; clients are
/// not expected to send anything else
pub(super) fn client_is_gone(
    incoming: Option<std::result::Result<WsMessage, axum::Error>>,
) -> bool {
    !matches!(
        incoming,
        Some(Ok(
            WsMessage::Text(_) | WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_)
        ))
    )
}
