//! Shared state for API handlers

use crate::AgentHub;
use crate::config::Config;
use std::sync::Arc;

/// Application state shared across all API routes
#[derive(Clone)]
pub struct AppState {
    /// The hub instance handling all operations
    pub hub: Arc<AgentHub>,
    /// Server configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new application state
    pub fn new(hub: Arc<AgentHub>, config: Arc<Config>) -> Self {
        Self { hub, config }
    }
}
