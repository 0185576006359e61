//! Arena server: the authoritative side of a first-person arena shooter.
//!
//! Clients connect over WebSocket and send only intent (held keys, mouse
//! deltas, shoot/reload). Matches simulate at a fixed 20 Hz tick and push
//! state back; nothing a client claims about its own position or health is
//! ever trusted.

mod app;
mod config;
mod game;
mod http;
mod lobby;
mod util;
mod ws;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);
    init_server_time();

    info!(
        addr = %config.server_addr,
        max_players = config.max_players_per_match,
        "Starting arena server"
    );

    // The lobby registry lives inside the shared state; match tasks spawn
    // themselves on demand, so there is nothing else to start here.
    let state = AppState::new(config.clone());
    let router = build_router(state);

    // Binding the listener is the one fatal error. Per-match and per-player
    // failures never take the process down.
    let listener = TcpListener::bind(config.server_addr).await?;
    info!("Listening on {} (/health, /ws)", config.server_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Resolves on Ctrl+C or SIGTERM. In-memory matches are discarded on exit.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
