//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the agenthub REST API
//! using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the agenthub REST API
///
/// This struct is used to generate the OpenAPI 3.1 specification that describes
/// all available endpoints, request/response types, and API behavior.
///
/// The spec can be accessed via:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation (if enabled)
#[derive(OpenApi)]
#[openapi(
    info(
        title = "agenthub REST API",
        version = "0.2.0",
        description = "REST and WebSocket API for running multi-agent AI experiments and managing model downloads",
        contact(
            name = "agenthub",
            url = "https://github.com/agenthub-dev/agenthub"
        ),
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8710", description = "Local development server")
    ),
    paths(
        // Experiments
        crate::api::routes::list_experiments,
        crate::api::routes::create_experiment,
        crate::api::routes::get_experiment,
        crate::api::routes::delete_experiment,
        crate::api::routes::cancel_experiment,
        crate::api::routes::stream_experiment,

        // Conversations
        crate::api::routes::list_conversations,
        crate::api::routes::import_conversation,
        crate::api::routes::get_conversation,
        crate::api::routes::update_conversation,
        crate::api::routes::delete_conversation,

        // Models
        crate::api::routes::list_models,
        crate::api::routes::registry_version,
        crate::api::routes::show_model,
        crate::api::routes::delete_model,
        crate::api::routes::start_pull,
        crate::api::routes::list_pull_tasks,
        crate::api::routes::get_pull_task,
        crate::api::routes::cancel_pull_task,
        crate::api::routes::stream_pull_task,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::ExperimentId,
        crate::types::ExperimentStatus,
        crate::types::TaskStatus,
        crate::types::AgentConfig,
        crate::types::ExperimentTask,
        crate::types::Message,
        crate::types::Experiment,
        crate::types::NewExperiment,
        crate::types::ConversationSnapshot,
        crate::types::ImportedConversation,
        crate::types::PullTask,
        crate::types::ExperimentIndexEntry,
        crate::types::FrameKind,
        crate::types::StreamFrame,

        // Store types
        crate::store::ConversationRecord,

        // Request/response types from route modules
        crate::api::routes::ImportConversationRequest,
        crate::api::routes::PullRequest,
        crate::api::routes::PullStarted,

        // Error types
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "agenthub", description = "Multi-agent experiment orchestration and model management")
    )
)]
pub struct ApiDoc;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_spec_generates_and_serializes() {
        let spec = ApiDoc::openapi();
        let json = serde_json::to_value(&spec).unwrap();

        assert!(json["paths"]["/experiments"].is_object());
        assert!(json["paths"]["/models/pull/{task_id}"].is_object());
        assert!(
            json["components"]["schemas"]["Experiment"].is_object(),
            "core schemas are registered"
        );
    }

    #[test]
    fn openapi_spec_documents_the_stream_endpoints() {
        let spec = ApiDoc::openapi();
        let json = serde_json::to_value(&spec).unwrap();

        assert!(json["paths"]["/experiments/{id}/stream"].is_object());
        assert!(json["paths"]["/models/pull/{task_id}/stream"].is_object());
    }
}
