//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::lobby::LobbyRegistry;

/// Shared application state. The lobby registry lives here for the duration
/// of the process and is handed to the network layer at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<LobbyRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(LobbyRegistry::new(config.max_players_per_match));
        Self {
            config: Arc::new(config),
            registry,
        }
    }
}
