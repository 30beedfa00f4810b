//! Conversation endpoints: snapshot lookup and imported-conversation CRUD

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::state::AppState;
use crate::error::Result;
use crate::store::ConversationRecord;
use crate::types::{AgentConfig, ImportedConversation, Message};

/// Request body for importing a free-standing conversation
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ImportConversationRequest {
    /// Display title
    pub title: String,

    /// Agents appearing in the transcript
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    /// The transcript itself
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// GET /conversations - List imported conversations
#[utoipa::path(
    get,
    path = "/conversations",
    responses(
        (status = 200, description = "Imported conversations, newest first", body = Vec<ImportedConversation>)
    )
)]
pub async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<Vec<ImportedConversation>>> {
    Ok(Json(state.hub.store().list_imported()?))
}

/// POST /conversations - Import a conversation
#[utoipa::path(
    post,
    path = "/conversations",
    request_body = ImportConversationRequest,
    responses(
        (status = 201, description = "Conversation imported", body = ImportedConversation)
    )
)]
pub async fn import_conversation(
    State(state): State<AppState>,
    Json(request): Json<ImportConversationRequest>,
) -> Result<impl IntoResponse> {
    let mut conversation = ImportedConversation {
        id: String::new(),
        title: request.title,
        agents: request.agents,
        messages: request.messages,
        created_at: Utc::now(),
        updated_at: None,
    };
    state.hub.store().save_imported(&mut conversation)?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /conversations/:id - Get a conversation by id
///
/// Composite ids (`{experiment_id}_{iteration}`) resolve to immutable
/// snapshots; other ids to imported conversations, with a directory-scan
/// fallback for legacy records.
#[utoipa::path(
    get,
    path = "/conversations/{id}",
    params(("id" = String, Path, description = "Snapshot composite id or imported conversation id")),
    responses(
        (status = 200, description = "The conversation", body = ConversationRecord),
        (status = 404, description = "Unknown conversation")
    )
)]
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationRecord>> {
    Ok(Json(state.hub.store().get_conversation(&id)?))
}

/// PUT /conversations/:id - Update an imported conversation
#[utoipa::path(
    put,
    path = "/conversations/{id}",
    params(("id" = String, Path, description = "Imported conversation id")),
    responses(
        (status = 200, description = "Updated conversation", body = ImportedConversation),
        (status = 404, description = "Unknown conversation"),
        (status = 409, description = "Target is an immutable snapshot")
    )
)]
pub async fn update_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<ImportedConversation>> {
    Ok(Json(state.hub.store().update_imported(&id, &patch)?))
}

/// DELETE /conversations/:id - Delete an imported conversation
#[utoipa::path(
    delete,
    path = "/conversations/{id}",
    params(("id" = String, Path, description = "Imported conversation id")),
    responses(
        (status = 204, description = "Conversation deleted"),
        (status = 404, description = "Unknown conversation")
    )
)]
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.hub.store().delete_imported(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
