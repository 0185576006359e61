//! Per-player authoritative session state

use uuid::Uuid;

use crate::ws::protocol::{MovementKeys, PlayerSnapshot, RosterEntry, Team};

pub const MAX_HEALTH: f32 = 100.0;
pub const MAGAZINE_CAPACITY: u32 = 30;
pub const RESERVE_CAPACITY: u32 = 90;
/// Reload takes 2.4 seconds from start to magazine refill
pub const RELOAD_DURATION_MS: u64 = 2400;

/// Last received intent for one player. Overwritten by each inbound input
/// message; the mouse delta is consumed (zeroed) by the physics pass so a
/// stale message cannot spin the player forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputFrame {
    pub keys: MovementKeys,
    pub mouse_dx: f32,
    pub mouse_dy: f32,
    pub shoot: bool,
    pub reload: bool,
}

/// Authoritative state for one connected player within a match
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub id: Uuid,
    pub name: String,
    pub team: Option<Team>,

    // Kinematics
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub vel_z: f32,
    pub grounded: bool,

    // Combat
    pub health: f32,
    pub ammo: u32,
    pub reserve_ammo: u32,
    pub reloading: bool,
    pub reload_started_ms: u64,
    pub last_shot_ms: u64,
    pub alive: bool,

    // Stats (reset at match restart, never by respawn)
    pub kills: u32,
    pub deaths: u32,

    pub input: InputFrame,
}

impl PlayerSession {
    pub fn new(id: Uuid, name: String, team: Option<Team>, spawn: (f32, f32, f32)) -> Self {
        Self {
            id,
            name,
            team,
            x: spawn.0,
            y: spawn.1,
            z: spawn.2,
            yaw: 0.0,
            pitch: 0.0,
            vel_x: 0.0,
            vel_y: 0.0,
            vel_z: 0.0,
            grounded: false,
            health: MAX_HEALTH,
            ammo: MAGAZINE_CAPACITY,
            reserve_ammo: RESERVE_CAPACITY,
            reloading: false,
            reload_started_ms: 0,
            last_shot_ms: 0,
            alive: true,
            kills: 0,
            deaths: 0,
            input: InputFrame::default(),
        }
    }

    /// Apply damage, clamped at zero health. A lethal hit flips the session
    /// to dead and counts the death; the killer's credit is the match's job.
    /// Returns true if this damage killed the player.
    pub fn apply_damage(&mut self, damage: f32) -> bool {
        if !self.alive {
            return false;
        }
        self.health = (self.health - damage).max(0.0);
        if self.health <= 0.0 {
            self.health = 0.0;
            self.alive = false;
            self.deaths += 1;
            true
        } else {
            false
        }
    }

    /// Bring a dead player back at a fresh spawn with full health and ammo.
    /// Kills and deaths are preserved.
    pub fn respawn(&mut self, spawn: (f32, f32, f32)) {
        self.x = spawn.0;
        self.y = spawn.1;
        self.z = spawn.2;
        self.vel_x = 0.0;
        self.vel_y = 0.0;
        self.vel_z = 0.0;
        self.health = MAX_HEALTH;
        self.ammo = MAGAZINE_CAPACITY;
        self.reserve_ammo = RESERVE_CAPACITY;
        self.alive = true;
        self.reloading = false;
    }

    /// Full reset when the lobby restarts for a new match
    pub fn reset_for_new_match(&mut self, spawn: (f32, f32, f32)) {
        self.kills = 0;
        self.deaths = 0;
        self.respawn(spawn);
        self.input = InputFrame::default();
    }

    /// Begin reloading if there is reserve ammo to pull from
    pub fn start_reload(&mut self, now_ms: u64) {
        if self.reserve_ammo > 0 {
            self.reloading = true;
            self.reload_started_ms = now_ms;
        }
    }

    /// Complete an in-flight reload once its timer has elapsed. Refills the
    /// magazine from reserve, never past capacity.
    pub fn finish_reload_if_due(&mut self, now_ms: u64) {
        if self.reloading && now_ms.saturating_sub(self.reload_started_ms) >= RELOAD_DURATION_MS {
            let missing = MAGAZINE_CAPACITY - self.ammo;
            let refill = missing.min(self.reserve_ammo);
            self.ammo += refill;
            self.reserve_ammo -= refill;
            self.reloading = false;
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            x: self.x,
            y: self.y,
            z: self.z,
            yaw: self.yaw,
            pitch: self.pitch,
            health: self.health,
            ammo: self.ammo,
            reserve_ammo: self.reserve_ammo,
            alive: self.alive,
            reloading: self.reloading,
            kills: self.kills,
            deaths: self.deaths,
        }
    }

    pub fn roster_entry(&self) -> RosterEntry {
        RosterEntry {
            id: self.id,
            name: self.name.clone(),
            team: self.team,
            kills: self.kills,
            deaths: self.deaths,
        }
    }
}
