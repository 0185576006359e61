//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Match mode, fixed at match creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Free-for-all, every player for themselves
    Ffa,
    /// Two teams, alpha vs omega
    Teams,
}

/// Team tag in teams mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Alpha,
    Omega,
}

impl Team {
    pub fn display_name(self) -> &'static str {
        match self {
            Team::Alpha => "Team Alpha",
            Team::Omega => "Team Omega",
        }
    }
}

/// Match lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Waiting for enough players
    Waiting,
    /// Countdown before going live
    Countdown,
    /// Match in progress
    Live,
    /// Match over, scoreboard shown, cooldown until reset
    Ended,
}

/// Held movement keys for one input frame
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MovementKeys {
    #[serde(default)]
    pub forward: bool,
    #[serde(default)]
    pub back: bool,
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
    #[serde(default)]
    pub jump: bool,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter open matchmaking; name is optional, the server generates one if missing
    Join {
        #[serde(default)]
        name: Option<String>,
    },

    /// Join one specific match by its 6-character code
    JoinByCode {
        #[serde(default)]
        name: Option<String>,
        code: String,
    },

    /// Per-tick intent. Overwrites the session's input buffer.
    Input {
        #[serde(default)]
        keys: MovementKeys,
        #[serde(default)]
        mouse_dx: f32,
        #[serde(default)]
        mouse_dy: f32,
        #[serde(default)]
        shoot: bool,
        #[serde(default)]
        reload: bool,
    },

    /// Request respawn while dead in a live match.
    /// While the match is in the ended phase this doubles as "play again".
    Respawn,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Initial state snapshot after a successful join
    LobbyJoined {
        code: String,
        mode: GameMode,
        map: String,
        player_id: Uuid,
        name: String,
        team: Option<Team>,
        players: Vec<RosterEntry>,
    },

    /// Join or join-by-code attempt failed; terminal for that attempt
    JoinRejected {
        code: String,
        message: String,
    },

    /// Lifecycle transition
    PhaseChanged {
        phase: MatchPhase,
        #[serde(skip_serializing_if = "Option::is_none")]
        countdown_secs: Option<u32>,
    },

    /// Full state broadcast, once per simulation tick while live
    Tick {
        players: Vec<PlayerSnapshot>,
        projectiles: Vec<ProjectileSnapshot>,
    },

    /// Match timer push, once per second while live
    TimerSync {
        seconds_remaining: u32,
    },

    /// Shooter-only hit feedback (sent whether or not the hit was lethal)
    Hit {
        target_id: Uuid,
        damage: f32,
        headshot: bool,
        new_health: f32,
    },

    /// Kill feed entry; the victim uses this to show the death screen
    Killed {
        killer_name: String,
        victim_name: String,
        victim_id: Uuid,
    },

    /// Roster churn
    PlayerJoined {
        id: Uuid,
        name: String,
        team: Option<Team>,
    },
    PlayerLeft {
        id: Uuid,
    },

    /// End-of-match summary
    MatchEnded {
        scoreboard: Scoreboard,
    },

    /// Error message for inconsistent or malformed requests
    Error {
        code: String,
        message: String,
    },
}

/// Roster entry for lobby join / player lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: Uuid,
    pub name: String,
    pub team: Option<Team>,
    pub kills: u32,
    pub deaths: u32,
}

/// Player state in a tick broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Yaw in radians
    pub yaw: f32,
    /// Pitch in radians, clamped to ±π/2
    pub pitch: f32,
    pub health: f32,
    pub ammo: u32,
    pub reserve_ammo: u32,
    pub alive: bool,
    pub reloading: bool,
    pub kills: u32,
    pub deaths: u32,
}

/// Projectile state in a tick broadcast.
/// Combat is hitscan, so this list stays empty; the field is kept so the
/// tick payload shape matches what clients expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub id: Uuid,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// End-of-match scoreboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scoreboard {
    /// Winner name, team display name, or "DRAW"
    pub winner: String,
    pub mode: GameMode,
    pub rows: Vec<ScoreRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRow {
    /// 1-based rank, ordered by kills descending
    pub rank: u32,
    pub name: String,
    pub team: Option<Team>,
    pub kills: u32,
    pub deaths: u32,
    /// Kills when deaths == 0, otherwise kills/deaths rounded to 2 decimals
    pub kd: f32,
}
