//! Game simulation modules

pub mod combat;
pub mod r#match;
pub mod physics;
pub mod scoreboard;
pub mod session;

pub use r#match::{GameMatch, MatchHandle};
pub use session::InputFrame;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

/// Commands routed into a match task. Joins and leaves arrive asynchronously
/// between ticks and are applied by the match task itself, never by blocking
/// the tick loop from outside.
#[derive(Debug)]
pub enum MatchCmd {
    Join {
        player_id: Uuid,
        name: String,
        /// Per-player channel for directed messages (join snapshot, hit feedback)
        outbox: mpsc::Sender<ServerMsg>,
        reply: oneshot::Sender<Result<(), JoinError>>,
    },
    Input {
        player_id: Uuid,
        frame: InputFrame,
    },
    Respawn {
        player_id: Uuid,
    },
    Leave {
        player_id: Uuid,
    },
}

/// Why a join attempt was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("lobby is full")]
    Full,
    #[error("lobby not found")]
    NotFound,
    #[error("lobby is shutting down")]
    Closed,
}

impl JoinError {
    /// Stable error code for the wire protocol
    pub fn code(&self) -> &'static str {
        match self {
            JoinError::Full => "lobby_full",
            JoinError::NotFound => "lobby_not_found",
            JoinError::Closed => "lobby_closed",
        }
    }
}
