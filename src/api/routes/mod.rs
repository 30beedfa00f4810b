//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`experiments`] — Experiment lifecycle and the run event stream
//! - [`conversations`] — Snapshot lookup and imported-conversation CRUD
//! - [`models`] — Registry passthrough and pull tasks
//! - [`system`] — Health and OpenAPI

mod conversations;
mod experiments;
mod models;
mod system;

// Re-export all handlers so `routes::function_name` continues to work
pub use conversations::*;
pub use experiments::*;
pub use models::*;
pub use system::*;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::SinkExt;
use futures::stream::SplitSink;

/// Normal closure: the stream delivered its terminal frame
pub(crate) const CLOSE_NORMAL: u16 = 1000;
/// Unexpected server-side failure while relaying
pub(crate) const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Application close code for an unknown experiment or task id
pub(crate) const CLOSE_NOT_FOUND: u16 = 4004;

/// Write half of a split WebSocket
pub(crate) type WsSender = SplitSink<WebSocket, WsMessage>;

/// Send a close frame on the write half
pub(crate) async fn close_with(sender: &mut WsSender, code: u16, reason: &'static str) {
    let _ = sender
        .send(WsMessage::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}
