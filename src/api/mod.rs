//! REST API and streaming server module
//!
//! Provides the HTTP surface over the hub: experiment lifecycle endpoints, a
//! per-experiment WebSocket stream, conversation lookup/import, and model
//! management with per-task pull progress streams. OpenAPI documentation is
//! generated with utoipa.

use crate::error::Result;
use crate::{AgentHub, Config};
use axum::{
    Router,
    http::HeaderValue,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Experiments
/// - `GET /experiments` - List experiments (index projection)
/// - `POST /experiments` - Create and start an experiment
/// - `GET /experiments/:id` - Get the full experiment record
/// - `DELETE /experiments/:id` - Delete an experiment and its snapshots
/// - `POST /experiments/:id/cancel` - Request cooperative cancellation
/// - `GET /experiments/:id/stream` - WebSocket stream of run events
///
/// ## Conversations
/// - `GET /conversations` - List imported conversations
/// - `POST /conversations` - Import a free-standing conversation
/// - `GET /conversations/:id` - Get a snapshot or imported conversation
/// - `PUT /conversations/:id` - Update an imported conversation
/// - `DELETE /conversations/:id` - Delete an imported conversation
///
/// ## Models
/// - `GET /models` - List registry models (tags)
/// - `GET /models/version` - Registry version
/// - `GET /models/:name` - Show model details
/// - `DELETE /models/:name` - Delete a model
/// - `POST /models/pull` - Start a background pull, returns a task id
/// - `GET /models/pull` - List pull tasks
/// - `GET /models/pull/:task_id` - Get one pull task
/// - `POST /models/pull/:task_id/cancel` - Cancel a pull task
/// - `GET /models/pull/:task_id/stream` - WebSocket stream of pull progress
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive documentation (if enabled)
pub fn create_router(hub: Arc<AgentHub>, config: Arc<Config>) -> Router {
    let state = AppState::new(hub, config.clone());

    let router = Router::new()
        // Experiments
        .route("/experiments", get(routes::list_experiments))
        .route("/experiments", post(routes::create_experiment))
        .route("/experiments/:id", get(routes::get_experiment))
        .route("/experiments/:id", delete(routes::delete_experiment))
        .route("/experiments/:id/cancel", post(routes::cancel_experiment))
        .route("/experiments/:id/stream", get(routes::stream_experiment))
        // Conversations
        .route("/conversations", get(routes::list_conversations))
        .route("/conversations", post(routes::import_conversation))
        .route("/conversations/:id", get(routes::get_conversation))
        .route("/conversations/:id", put(routes::update_conversation))
        .route("/conversations/:id", delete(routes::delete_conversation))
        // Models
        .route("/models", get(routes::list_models))
        .route("/models/version", get(routes::registry_version))
        .route("/models/pull", post(routes::start_pull))
        .route("/models/pull", get(routes::list_pull_tasks))
        .route("/models/pull/:task_id", get(routes::get_pull_task))
        .route("/models/pull/:task_id/cancel", post(routes::cancel_pull_task))
        .route("/models/pull/:task_id/stream", get(routes::stream_pull_task))
        .route("/models/:name", get(routes::show_model))
        .route("/models/:name", delete(routes::delete_model))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    // Merge Swagger UI routes if enabled in config (before applying state)
    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api/v1/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    // Apply CORS middleware if enabled in config
    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// Allows the specified origins (or any, for "*"), all methods and all
/// headers.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Creates a TCP listener, binds it to the configured address, and serves the
/// API router until the server is shut down.
pub async fn start_api_server(hub: Arc<AgentHub>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(hub, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
