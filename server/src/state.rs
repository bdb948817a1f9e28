use std::sync::Arc;

use crate::chat::Hub;
use crate::config::ConnectionSettings;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Room directory
    pub hub: Hub,
    /// Limits and timers applied to every client socket
    pub connection: Arc<ConnectionSettings>,
}

impl AppState {
    pub fn new(hub: Hub, connection: ConnectionSettings) -> Self {
        Self {
            hub,
            connection: Arc::new(connection),
        }
    }
}
