//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

/// Absolute cap on match size regardless of configuration
const MAX_CAPACITY: usize = 18;
const DEFAULT_CAPACITY: usize = 15;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma-separated; "*" allows any
    pub client_origin: String,
    /// Players per match, clamped to 2..=18
    pub max_players_per_match: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT; fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let max_players_per_match = match env::var("MAX_PLAYERS_PER_MATCH") {
            Ok(raw) => raw
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidCapacity)?
                .clamp(2, MAX_CAPACITY),
            Err(_) => DEFAULT_CAPACITY,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            max_players_per_match,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("MAX_PLAYERS_PER_MATCH must be a positive integer")]
    InvalidCapacity,
}
