//! Match state machine and authoritative tick loop

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::{tick_delta, unix_millis, TICK_DURATION_MICROS};
use crate::ws::protocol::{GameMode, MatchPhase, ProjectileSnapshot, ServerMsg, Team};

use super::combat;
use super::physics;
use super::scoreboard;
use super::session::{PlayerSession, MAGAZINE_CAPACITY};
use super::{InputFrame, JoinError, MatchCmd};

/// Countdown starts once this many players are present
pub const MIN_PLAYERS_TO_START: usize = 2;
pub const COUNTDOWN_SECS: f32 = 15.0;
pub const MATCH_DURATION_SECS: f32 = 300.0;
/// After a match ends the lobby resets on its own once this cooldown elapses
pub const END_COOLDOWN_SECS: f32 = 30.0;
/// Map catalog, picked from at creation and on every reset
pub const MAPS: [&str; 3] = ["arabic_city", "old_town", "snow_town"];

const TIMER_PUSH_INTERVAL_MS: u64 = 1_000;

fn phase_as_u8(phase: MatchPhase) -> u8 {
    match phase {
        MatchPhase::Waiting => 0,
        MatchPhase::Countdown => 1,
        MatchPhase::Live => 2,
        MatchPhase::Ended => 3,
    }
}

fn phase_from_u8(raw: u8) -> MatchPhase {
    match raw {
        1 => MatchPhase::Countdown,
        2 => MatchPhase::Live,
        3 => MatchPhase::Ended,
        _ => MatchPhase::Waiting,
    }
}

/// Handle to a running match, shared through the lobby registry
#[derive(Clone, Debug)]
pub struct MatchHandle {
    pub code: String,
    pub cmd_tx: mpsc::Sender<MatchCmd>,
    events_tx: broadcast::Sender<ServerMsg>,
    player_count: Arc<AtomicUsize>,
    phase: Arc<AtomicU8>,
    max_players: usize,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn phase(&self) -> MatchPhase {
        phase_from_u8(self.phase.load(Ordering::Relaxed))
    }

    /// Whether open matchmaking may route a player here. The match task
    /// re-checks capacity when the join lands, so this is only a pre-filter.
    pub fn accepts_players(&self) -> bool {
        self.phase() != MatchPhase::Ended && self.player_count() < self.max_players
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.events_tx.subscribe()
    }
}

/// The authoritative match: owns every player session exclusively and is the
/// only writer of its state. Inbound commands are interleaved with ticks via
/// `select!`, so nothing mutates a session concurrently with a tick.
pub struct GameMatch {
    code: String,
    mode: GameMode,
    map: String,
    phase: MatchPhase,
    /// Set when a countdown has been started for the current waiting period
    countdown_started: bool,
    countdown_remaining: f32,
    match_time_remaining: f32,
    end_cooldown_remaining: f32,
    last_timer_push_ms: u64,
    players: HashMap<Uuid, PlayerSession>,
    /// Per-player channels for directed messages; roster-keyed like `players`
    outboxes: HashMap<Uuid, mpsc::Sender<ServerMsg>>,
    rng: ChaCha8Rng,
    max_players: usize,
    /// A match only shuts down on empty once someone has actually joined
    had_players: bool,
    cmd_rx: mpsc::Receiver<MatchCmd>,
    events_tx: broadcast::Sender<ServerMsg>,
    player_count: Arc<AtomicUsize>,
    phase_mirror: Arc<AtomicU8>,
}

impl GameMatch {
    pub fn new(code: String, mode: GameMode, seed: u64, max_players: usize) -> (Self, MatchHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(128);
        let player_count = Arc::new(AtomicUsize::new(0));
        let phase_mirror = Arc::new(AtomicU8::new(phase_as_u8(MatchPhase::Waiting)));

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let map = MAPS[rng.gen_range(0..MAPS.len())].to_string();

        let handle = MatchHandle {
            code: code.clone(),
            cmd_tx,
            events_tx: events_tx.clone(),
            player_count: player_count.clone(),
            phase: phase_mirror.clone(),
            max_players,
        };

        let game_match = Self {
            code,
            mode,
            map,
            phase: MatchPhase::Waiting,
            countdown_started: false,
            countdown_remaining: COUNTDOWN_SECS,
            match_time_remaining: MATCH_DURATION_SECS,
            end_cooldown_remaining: END_COOLDOWN_SECS,
            last_timer_push_ms: 0,
            players: HashMap::new(),
            outboxes: HashMap::new(),
            rng,
            max_players,
            had_players: false,
            cmd_rx,
            events_tx,
            player_count,
            phase_mirror,
        };

        (game_match, handle)
    }

    /// Run the match task: fixed-rate tick plus command handling, until the
    /// last player leaves. Timers live inside this task, so destroying the
    /// match can never leave a stale countdown or cooldown behind.
    pub async fn run(mut self) {
        info!(
            match_code = %self.code,
            mode = ?self.mode,
            map = %self.map,
            "Match task started"
        );

        let mut tick_interval = interval(Duration::from_micros(TICK_DURATION_MICROS));
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.step(unix_millis());
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_cmd(cmd),
                    None => break,
                }
            }

            if self.had_players && self.players.is_empty() {
                info!(match_code = %self.code, "All players left, shutting down match");
                break;
            }
        }
    }

    fn handle_cmd(&mut self, cmd: MatchCmd) {
        match cmd {
            MatchCmd::Join {
                player_id,
                name,
                outbox,
                reply,
            } => {
                let result = self.handle_join(player_id, name, outbox);
                let _ = reply.send(result);
            }
            MatchCmd::Input { player_id, frame } => self.handle_input(player_id, frame),
            MatchCmd::Respawn { player_id } => self.handle_respawn(player_id),
            MatchCmd::Leave { player_id } => self.handle_leave(player_id),
        }
    }

    fn handle_join(
        &mut self,
        player_id: Uuid,
        name: String,
        outbox: mpsc::Sender<ServerMsg>,
    ) -> Result<(), JoinError> {
        if self.players.contains_key(&player_id) {
            warn!(match_code = %self.code, player_id = %player_id, "Player already in match");
            return Ok(());
        }
        if self.players.len() >= self.max_players {
            return Err(JoinError::Full);
        }

        let team = self.assign_team();
        let spawn = self.spawn_point();
        let player = PlayerSession::new(player_id, name.clone(), team, spawn);

        // Existing players learn about the newcomer; the newcomer's own
        // announcement is folded into the roster snapshot below, so this
        // goes to the current outboxes only, not the broadcast.
        let announce = ServerMsg::PlayerJoined {
            id: player_id,
            name: name.clone(),
            team,
        };
        for tx in self.outboxes.values() {
            let _ = tx.try_send(announce.clone());
        }

        self.players.insert(player_id, player);
        self.outboxes.insert(player_id, outbox);
        self.had_players = true;
        self.player_count.store(self.players.len(), Ordering::Relaxed);

        let roster = self.players.values().map(|p| p.roster_entry()).collect();
        self.send_direct(
            player_id,
            ServerMsg::LobbyJoined {
                code: self.code.clone(),
                mode: self.mode,
                map: self.map.clone(),
                player_id,
                name,
                team,
                players: roster,
            },
        );

        // Late joiners are told the current phase right away
        match self.phase {
            MatchPhase::Live => self.send_direct(
                player_id,
                ServerMsg::PhaseChanged {
                    phase: MatchPhase::Live,
                    countdown_secs: None,
                },
            ),
            MatchPhase::Countdown => self.send_direct(
                player_id,
                ServerMsg::PhaseChanged {
                    phase: MatchPhase::Countdown,
                    countdown_secs: Some(self.countdown_remaining.ceil() as u32),
                },
            ),
            // A join-by-code during the end cooldown lands on the scoreboard
            // screen, not a stale waiting screen
            MatchPhase::Ended => {
                self.send_direct(
                    player_id,
                    ServerMsg::PhaseChanged {
                        phase: MatchPhase::Ended,
                        countdown_secs: None,
                    },
                );
                self.send_direct(
                    player_id,
                    ServerMsg::MatchEnded {
                        scoreboard: scoreboard::build(self.mode, &self.players),
                    },
                );
            }
            MatchPhase::Waiting => {}
        }

        info!(
            match_code = %self.code,
            player_id = %player_id,
            player_count = self.players.len(),
            "Player joined match"
        );

        Ok(())
    }

    fn handle_input(&mut self, player_id: Uuid, frame: InputFrame) {
        match self.players.get_mut(&player_id) {
            Some(player) => player.input = frame,
            None => debug!(
                match_code = %self.code,
                player_id = %player_id,
                "Input for unknown session, ignoring"
            ),
        }
    }

    fn handle_respawn(&mut self, player_id: Uuid) {
        match self.phase {
            MatchPhase::Live => {
                let spawn = self.spawn_point();
                match self.players.get_mut(&player_id) {
                    Some(player) if !player.alive => player.respawn(spawn),
                    _ => debug!(
                        match_code = %self.code,
                        player_id = %player_id,
                        "Respawn request while alive or unknown, ignoring"
                    ),
                }
            }
            // After a match a respawn request means "play again"
            MatchPhase::Ended => {
                if self.players.contains_key(&player_id) {
                    info!(match_code = %self.code, player_id = %player_id, "Play again requested");
                    self.reset_for_new_match();
                }
            }
            _ => debug!(
                match_code = %self.code,
                player_id = %player_id,
                phase = ?self.phase,
                "Respawn request outside live match, ignoring"
            ),
        }
    }

    fn handle_leave(&mut self, player_id: Uuid) {
        if self.players.remove(&player_id).is_none() {
            return;
        }
        self.outboxes.remove(&player_id);
        self.player_count.store(self.players.len(), Ordering::Relaxed);

        let _ = self.events_tx.send(ServerMsg::PlayerLeft { id: player_id });

        info!(
            match_code = %self.code,
            player_id = %player_id,
            player_count = self.players.len(),
            "Player left match"
        );

        // A countdown or live match cannot continue below the minimum; abort
        // back to waiting without a scoreboard.
        if self.players.len() < MIN_PLAYERS_TO_START
            && matches!(self.phase, MatchPhase::Countdown | MatchPhase::Live)
        {
            self.revert_to_waiting();
        }
    }

    /// Advance the match by one simulation tick
    pub fn step(&mut self, now_ms: u64) {
        let dt = tick_delta();

        match self.phase {
            MatchPhase::Waiting => {
                // Re-checked every tick so a lobby that reset with enough
                // players present starts a fresh countdown on its own.
                if self.players.len() >= MIN_PLAYERS_TO_START && !self.countdown_started {
                    self.start_countdown();
                }
            }
            MatchPhase::Countdown => {
                self.countdown_remaining -= dt;
                if self.countdown_remaining <= 0.0 {
                    if self.players.len() >= MIN_PLAYERS_TO_START {
                        self.go_live(now_ms);
                    } else {
                        self.revert_to_waiting();
                    }
                }
            }
            MatchPhase::Live => self.step_live(now_ms, dt),
            MatchPhase::Ended => {
                self.end_cooldown_remaining -= dt;
                if self.end_cooldown_remaining <= 0.0 {
                    self.reset_for_new_match();
                }
            }
        }
    }

    fn step_live(&mut self, now_ms: u64, dt: f32) {
        self.match_time_remaining -= dt;

        if now_ms.saturating_sub(self.last_timer_push_ms) >= TIMER_PUSH_INTERVAL_MS {
            let _ = self.events_tx.send(ServerMsg::TimerSync {
                seconds_remaining: self.match_time_remaining.max(0.0) as u32,
            });
            self.last_timer_push_ms = now_ms;
        }

        if self.match_time_remaining <= 0.0 {
            self.end_match();
            return;
        }

        // All physics completes before any combat reads positions
        for player in self.players.values_mut() {
            if player.alive {
                physics::integrate(player, dt);
                player.finish_reload_if_due(now_ms);
            }
        }

        let intents: Vec<(Uuid, bool, bool)> = self
            .players
            .values()
            .filter(|p| p.alive)
            .map(|p| (p.id, p.input.shoot, p.input.reload))
            .collect();

        for (player_id, shoot, reload) in intents {
            if shoot {
                self.resolve_shot(player_id, now_ms);
            }
            if reload {
                if let Some(player) = self.players.get_mut(&player_id) {
                    if !player.reloading && player.ammo < MAGAZINE_CAPACITY {
                        player.start_reload(now_ms);
                    }
                }
            }
        }

        self.broadcast_tick();
    }

    /// Resolve one shoot intent: rate limit, ammo bookkeeping, hitscan, then
    /// damage in arrival order. Single-threaded per tick, so two shooters can
    /// never race on the same target.
    fn resolve_shot(&mut self, shooter_id: Uuid, now_ms: u64) {
        let Some(shooter) = self.players.get(&shooter_id) else {
            return;
        };
        if shooter.reloading {
            debug!(match_code = %self.code, player_id = %shooter_id, "Shot while reloading, ignoring");
            return;
        }
        if !combat::fire_rate_allows(shooter.last_shot_ms, now_ms) {
            return;
        }

        // Out of magazine: reload instead of firing when reserve allows
        if shooter.ammo == 0 {
            let has_reserve = shooter.reserve_ammo > 0;
            if has_reserve {
                if let Some(shooter) = self.players.get_mut(&shooter_id) {
                    shooter.start_reload(now_ms);
                }
            }
            return;
        }

        let hit = combat::find_hit(shooter, self.mode, self.players.values());

        if let Some(shooter) = self.players.get_mut(&shooter_id) {
            shooter.ammo -= 1;
            shooter.last_shot_ms = now_ms;
        }

        let Some(hit) = hit else { return };

        let mut killed = None;
        let mut new_health = 0.0;
        if let Some(target) = self.players.get_mut(&hit.target_id) {
            let lethal = target.apply_damage(hit.damage);
            new_health = target.health;
            if lethal {
                killed = Some((target.name.clone(), hit.target_id));
            }
        }

        // Shooter always gets raw hit feedback, lethal or not
        self.send_direct(
            shooter_id,
            ServerMsg::Hit {
                target_id: hit.target_id,
                damage: hit.damage,
                headshot: hit.headshot,
                new_health,
            },
        );

        if let Some((victim_name, victim_id)) = killed {
            let killer_name = match self.players.get_mut(&shooter_id) {
                Some(shooter) => {
                    shooter.kills += 1;
                    shooter.name.clone()
                }
                None => String::new(),
            };

            info!(
                match_code = %self.code,
                killer = %killer_name,
                victim = %victim_name,
                "Kill"
            );

            let _ = self.events_tx.send(ServerMsg::Killed {
                killer_name,
                victim_name,
                victim_id,
            });
        }
    }

    /// Deliver a message to one player's connection only. Dropped when the
    /// outbox is full or the socket already went away.
    fn send_direct(&self, player_id: Uuid, msg: ServerMsg) {
        if let Some(tx) = self.outboxes.get(&player_id) {
            if tx.try_send(msg).is_err() {
                debug!(match_code = %self.code, %player_id, "Dropped direct message");
            }
        }
    }

    fn broadcast_tick(&self) {
        let players = self.players.values().map(|p| p.snapshot()).collect();
        let _ = self.events_tx.send(ServerMsg::Tick {
            players,
            projectiles: Vec::<ProjectileSnapshot>::new(),
        });
    }

    fn start_countdown(&mut self) {
        self.set_phase(MatchPhase::Countdown);
        self.countdown_started = true;
        self.countdown_remaining = COUNTDOWN_SECS;
        let _ = self.events_tx.send(ServerMsg::PhaseChanged {
            phase: MatchPhase::Countdown,
            countdown_secs: Some(COUNTDOWN_SECS as u32),
        });
        info!(match_code = %self.code, "Countdown started");
    }

    fn go_live(&mut self, now_ms: u64) {
        self.set_phase(MatchPhase::Live);
        self.match_time_remaining = MATCH_DURATION_SECS;
        self.last_timer_push_ms = now_ms;
        let _ = self.events_tx.send(ServerMsg::PhaseChanged {
            phase: MatchPhase::Live,
            countdown_secs: None,
        });
        info!(match_code = %self.code, "Match live");
    }

    fn end_match(&mut self) {
        self.set_phase(MatchPhase::Ended);
        self.end_cooldown_remaining = END_COOLDOWN_SECS;

        let scoreboard = scoreboard::build(self.mode, &self.players);
        info!(match_code = %self.code, winner = %scoreboard.winner, "Match ended");
        let _ = self.events_tx.send(ServerMsg::MatchEnded { scoreboard });
    }

    /// Abort back to waiting without a scoreboard (player count dropped, or
    /// the countdown elapsed under-populated)
    fn revert_to_waiting(&mut self) {
        self.set_phase(MatchPhase::Waiting);
        self.countdown_started = false;
        self.match_time_remaining = MATCH_DURATION_SECS;
        let _ = self.events_tx.send(ServerMsg::PhaseChanged {
            phase: MatchPhase::Waiting,
            countdown_secs: None,
        });
        info!(match_code = %self.code, "Match reverted to waiting");
    }

    /// Fresh stats, fresh spawns, new map, back to waiting
    fn reset_for_new_match(&mut self) {
        let ids: Vec<Uuid> = self.players.keys().copied().collect();
        for id in ids {
            let spawn = self.spawn_point();
            if let Some(player) = self.players.get_mut(&id) {
                player.reset_for_new_match(spawn);
            }
        }
        self.map = MAPS[self.rng.gen_range(0..MAPS.len())].to_string();
        info!(match_code = %self.code, map = %self.map, "Lobby reset for new match");
        self.revert_to_waiting();
    }

    fn set_phase(&mut self, phase: MatchPhase) {
        self.phase = phase;
        self.phase_mirror.store(phase_as_u8(phase), Ordering::Relaxed);
    }

    /// Teams mode balances by count, ties going to alpha; ffa has no teams
    fn assign_team(&self) -> Option<Team> {
        match self.mode {
            GameMode::Ffa => None,
            GameMode::Teams => {
                let alpha = self
                    .players
                    .values()
                    .filter(|p| p.team == Some(Team::Alpha))
                    .count();
                let omega = self
                    .players
                    .values()
                    .filter(|p| p.team == Some(Team::Omega))
                    .count();
                Some(if alpha <= omega { Team::Alpha } else { Team::Omega })
            }
        }
    }

    /// Random spawn on a ring around the map center
    fn spawn_point(&mut self) -> (f32, f32, f32) {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let radius = self.rng.gen_range(20.0..30.0);
        (angle.cos() * radius, 1.0, angle.sin() * radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::session::{MAX_HEALTH, RESERVE_CAPACITY};
    use tokio::sync::oneshot;

    const TICK_MS: u64 = 50;

    struct Harness {
        game: GameMatch,
        handle: MatchHandle,
        events: broadcast::Receiver<ServerMsg>,
        now_ms: u64,
    }

    impl Harness {
        fn new(mode: GameMode) -> Self {
            Self::with_capacity(mode, 15)
        }

        fn with_capacity(mode: GameMode, max_players: usize) -> Self {
            let (game, handle) = GameMatch::new("TEST01".into(), mode, 7, max_players);
            let events = handle.subscribe();
            Self {
                game,
                handle,
                events,
                now_ms: 1_000_000,
            }
        }

        fn join(&mut self, name: &str) -> (Uuid, mpsc::Receiver<ServerMsg>) {
            let id = Uuid::new_v4();
            let (outbox_tx, outbox_rx) = mpsc::channel(64);
            let (reply_tx, mut reply_rx) = oneshot::channel();
            self.game.handle_cmd(MatchCmd::Join {
                player_id: id,
                name: name.into(),
                outbox: outbox_tx,
                reply: reply_tx,
            });
            assert_eq!(reply_rx.try_recv().unwrap(), Ok(()));
            (id, outbox_rx)
        }

        fn try_join(&mut self, name: &str) -> Result<(), JoinError> {
            let (outbox_tx, _outbox_rx) = mpsc::channel(64);
            let (reply_tx, mut reply_rx) = oneshot::channel();
            self.game.handle_cmd(MatchCmd::Join {
                player_id: Uuid::new_v4(),
                name: name.into(),
                outbox: outbox_tx,
                reply: reply_tx,
            });
            reply_rx.try_recv().unwrap()
        }

        fn tick(&mut self) {
            self.now_ms += TICK_MS;
            self.game.step(self.now_ms);
        }

        fn tick_secs(&mut self, secs: f32) {
            let ticks = (secs / tick_delta()).ceil() as usize;
            for _ in 0..ticks {
                self.tick();
            }
        }

        fn drain_events(&mut self) -> Vec<ServerMsg> {
            let mut out = Vec::new();
            loop {
                match self.events.try_recv() {
                    Ok(msg) => out.push(msg),
                    // Long runs overflow the ring with tick broadcasts; the
                    // retained tail is all these tests care about
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            out
        }
    }

    fn phase_changes(events: &[ServerMsg]) -> Vec<MatchPhase> {
        events
            .iter()
            .filter_map(|m| match m {
                ServerMsg::PhaseChanged { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn single_player_waits_indefinitely() {
        let mut h = Harness::new(GameMode::Ffa);
        h.join("Solo");
        h.tick_secs(60.0);
        assert_eq!(h.game.phase, MatchPhase::Waiting);
    }

    #[test]
    fn second_join_starts_countdown_then_live() {
        let mut h = Harness::new(GameMode::Ffa);
        h.join("One");
        h.tick();
        assert_eq!(h.game.phase, MatchPhase::Waiting);

        h.join("Two");
        h.tick();
        assert_eq!(h.game.phase, MatchPhase::Countdown);

        h.tick_secs(COUNTDOWN_SECS + 1.0);
        assert_eq!(h.game.phase, MatchPhase::Live);

        let phases = phase_changes(&h.drain_events());
        assert_eq!(phases, vec![MatchPhase::Countdown, MatchPhase::Live]);
    }

    #[test]
    fn leave_during_countdown_reverts_and_countdown_can_restart() {
        let mut h = Harness::new(GameMode::Ffa);
        h.join("One");
        let (second, _rx) = h.join("Two");
        h.tick();
        assert_eq!(h.game.phase, MatchPhase::Countdown);

        h.game.handle_cmd(MatchCmd::Leave { player_id: second });
        assert_eq!(h.game.phase, MatchPhase::Waiting);

        h.join("Three");
        h.tick();
        assert_eq!(h.game.phase, MatchPhase::Countdown);
    }

    #[test]
    fn countdown_elapsing_underpopulated_reverts() {
        let mut h = Harness::new(GameMode::Ffa);
        h.join("One");
        let (second, _rx) = h.join("Two");
        h.tick();
        // Drop below minimum mid-countdown without the leave shortcut firing
        h.game.players.remove(&second);
        h.tick_secs(COUNTDOWN_SECS + 1.0);
        assert_eq!(h.game.phase, MatchPhase::Waiting);
        assert!(!h.game.countdown_started);
    }

    #[test]
    fn leave_during_live_aborts_without_scoreboard() {
        let mut h = Harness::new(GameMode::Ffa);
        h.join("One");
        let (second, _rx) = h.join("Two");
        h.tick_secs(COUNTDOWN_SECS + 1.0);
        assert_eq!(h.game.phase, MatchPhase::Live);
        h.drain_events();

        h.game.handle_cmd(MatchCmd::Leave { player_id: second });
        assert_eq!(h.game.phase, MatchPhase::Waiting);
        let events = h.drain_events();
        assert!(!events.iter().any(|m| matches!(m, ServerMsg::MatchEnded { .. })));
    }

    #[test]
    fn match_timer_elapses_into_ended_with_ranked_scoreboard() {
        let mut h = Harness::new(GameMode::Ffa);
        let (first, _rx1) = h.join("One");
        h.join("Two");
        h.tick_secs(COUNTDOWN_SECS + 1.0);
        assert_eq!(h.game.phase, MatchPhase::Live);

        if let Some(p) = h.game.players.get_mut(&first) {
            p.kills = 4;
        }

        h.tick_secs(MATCH_DURATION_SECS + 1.0);
        assert_eq!(h.game.phase, MatchPhase::Ended);

        let events = h.drain_events();
        let scoreboard = events
            .iter()
            .find_map(|m| match m {
                ServerMsg::MatchEnded { scoreboard } => Some(scoreboard.clone()),
                _ => None,
            })
            .expect("scoreboard broadcast");
        assert_eq!(scoreboard.winner, "One");
        let ranks: Vec<u32> = scoreboard.rows.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2]);
        assert!(scoreboard.rows[0].kills >= scoreboard.rows[1].kills);
    }

    #[test]
    fn ended_resets_after_cooldown_with_fresh_stats_and_countdown_restarts() {
        let mut h = Harness::new(GameMode::Ffa);
        let (first, _rx1) = h.join("One");
        h.join("Two");
        h.tick_secs(COUNTDOWN_SECS + 1.0);
        if let Some(p) = h.game.players.get_mut(&first) {
            p.kills = 2;
            p.deaths = 3;
        }
        h.tick_secs(MATCH_DURATION_SECS + 1.0);
        assert_eq!(h.game.phase, MatchPhase::Ended);

        h.tick_secs(END_COOLDOWN_SECS + 1.0);
        // Reset landed back in waiting, then the still-populated lobby
        // started a new countdown on its own
        assert_eq!(h.game.phase, MatchPhase::Countdown);
        let p = h.game.players.get(&first).unwrap();
        assert_eq!((p.kills, p.deaths), (0, 0));
        assert_eq!(p.health, MAX_HEALTH);
    }

    #[test]
    fn respawn_during_ended_counts_as_play_again() {
        let mut h = Harness::new(GameMode::Ffa);
        let (first, _rx1) = h.join("One");
        h.join("Two");
        h.tick_secs(COUNTDOWN_SECS + 1.0);
        h.tick_secs(MATCH_DURATION_SECS + 1.0);
        assert_eq!(h.game.phase, MatchPhase::Ended);

        h.game.handle_cmd(MatchCmd::Respawn { player_id: first });
        assert_eq!(h.game.phase, MatchPhase::Waiting);
    }

    #[test]
    fn join_past_capacity_is_rejected() {
        let mut h = Harness::with_capacity(GameMode::Ffa, 2);
        h.join("One");
        h.join("Two");
        assert_eq!(h.try_join("Three"), Err(JoinError::Full));
        assert_eq!(h.handle.player_count(), 2);
    }

    #[test]
    fn existing_players_are_told_about_a_newcomer_directly() {
        let mut h = Harness::new(GameMode::Ffa);
        let (_first, mut first_rx) = h.join("One");
        while first_rx.try_recv().is_ok() {}

        let (second, _rx2) = h.join("Two");
        let msg = first_rx.try_recv().unwrap();
        assert!(matches!(msg, ServerMsg::PlayerJoined { id, .. } if id == second));

        // The announcement never rides the broadcast, so a joiner whose
        // subscription predates their join does not see themselves arrive
        assert!(!h
            .drain_events()
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerJoined { .. })));
    }

    #[test]
    fn late_joiner_during_live_is_told_the_phase() {
        let mut h = Harness::new(GameMode::Ffa);
        h.join("One");
        h.join("Two");
        h.tick_secs(COUNTDOWN_SECS + 1.0);
        assert_eq!(h.game.phase, MatchPhase::Live);

        let (_, mut outbox) = h.join("Late");
        let first = outbox.try_recv().unwrap();
        assert!(matches!(first, ServerMsg::LobbyJoined { .. }));
        let second = outbox.try_recv().unwrap();
        assert!(matches!(
            second,
            ServerMsg::PhaseChanged { phase: MatchPhase::Live, .. }
        ));
    }

    #[test]
    fn late_joiner_during_ended_gets_phase_and_scoreboard() {
        let mut h = Harness::new(GameMode::Ffa);
        h.join("One");
        h.join("Two");
        h.tick_secs(COUNTDOWN_SECS + 1.0);
        h.tick_secs(MATCH_DURATION_SECS + 1.0);
        assert_eq!(h.game.phase, MatchPhase::Ended);

        let (_, mut outbox) = h.join("Late");
        let mut msgs = Vec::new();
        while let Ok(msg) = outbox.try_recv() {
            msgs.push(msg);
        }
        assert!(matches!(msgs[0], ServerMsg::LobbyJoined { .. }));
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::PhaseChanged { phase: MatchPhase::Ended, .. }
        )));
        assert!(msgs.iter().any(|m| matches!(m, ServerMsg::MatchEnded { .. })));
    }

    #[test]
    fn teams_join_balances_alpha_and_omega() {
        let mut h = Harness::new(GameMode::Teams);
        let (a, _r1) = h.join("A");
        let (b, _r2) = h.join("B");
        let (c, _r3) = h.join("C");
        assert_eq!(h.game.players[&a].team, Some(Team::Alpha));
        assert_eq!(h.game.players[&b].team, Some(Team::Omega));
        assert_eq!(h.game.players[&c].team, Some(Team::Alpha));
    }

    /// Aim two players at each other and let one shoot
    fn line_up_and_go_live(h: &mut Harness) -> (Uuid, Uuid, mpsc::Receiver<ServerMsg>) {
        let (shooter, shooter_rx) = h.join("Shooter");
        let (target, _target_rx) = h.join("Target");
        h.tick_secs(COUNTDOWN_SECS + 1.0);
        assert_eq!(h.game.phase, MatchPhase::Live);

        // Positions under our control: shooter at origin aiming +z
        {
            let p = h.game.players.get_mut(&shooter).unwrap();
            p.x = 0.0;
            p.y = 0.0;
            p.z = 0.0;
            p.yaw = 0.0;
            p.pitch = 0.0;
        }
        {
            let p = h.game.players.get_mut(&target).unwrap();
            p.x = 0.0;
            p.y = 0.0;
            p.z = 10.0;
        }
        (shooter, target, shooter_rx)
    }

    #[test]
    fn shot_applies_bodyshot_damage_and_notifies_shooter() {
        let mut h = Harness::new(GameMode::Ffa);
        let (shooter, target, mut shooter_rx) = line_up_and_go_live(&mut h);

        h.game.resolve_shot(shooter, h.now_ms);

        let p = h.game.players.get(&target).unwrap();
        assert_eq!(p.health, MAX_HEALTH - combat::BODYSHOT_DAMAGE);
        assert_eq!(h.game.players[&shooter].ammo, MAGAZINE_CAPACITY - 1);

        // Directed hit feedback: skip join-time messages, find the Hit
        let mut saw_hit = false;
        while let Ok(msg) = shooter_rx.try_recv() {
            if let ServerMsg::Hit { target_id, damage, headshot, new_health } = msg {
                assert_eq!(target_id, target);
                assert_eq!(damage, combat::BODYSHOT_DAMAGE);
                assert!(!headshot);
                assert_eq!(new_health, MAX_HEALTH - combat::BODYSHOT_DAMAGE);
                saw_hit = true;
            }
        }
        assert!(saw_hit);
    }

    #[test]
    fn fire_rate_gates_successive_shots() {
        let mut h = Harness::new(GameMode::Ffa);
        let (shooter, target, _rx) = line_up_and_go_live(&mut h);

        h.game.resolve_shot(shooter, h.now_ms);
        // 99 ms later: rejected
        h.game.resolve_shot(shooter, h.now_ms + 99);
        assert_eq!(
            h.game.players[&target].health,
            MAX_HEALTH - combat::BODYSHOT_DAMAGE
        );
        // Exactly 100 ms later: accepted
        h.game.resolve_shot(shooter, h.now_ms + 100);
        assert_eq!(
            h.game.players[&target].health,
            MAX_HEALTH - 2.0 * combat::BODYSHOT_DAMAGE
        );
    }

    #[test]
    fn team_fire_does_no_damage() {
        let mut h = Harness::new(GameMode::Teams);
        let (shooter, target, _rx) = line_up_and_go_live(&mut h);
        // Joined in balance order, so make them teammates explicitly
        h.game.players.get_mut(&shooter).unwrap().team = Some(Team::Alpha);
        h.game.players.get_mut(&target).unwrap().team = Some(Team::Alpha);

        h.game.resolve_shot(shooter, h.now_ms);
        assert_eq!(h.game.players[&target].health, MAX_HEALTH);
        // The round was still spent
        assert_eq!(h.game.players[&shooter].ammo, MAGAZINE_CAPACITY - 1);

        // Against an enemy the same shot lands
        h.game.players.get_mut(&target).unwrap().team = Some(Team::Omega);
        h.game.resolve_shot(shooter, h.now_ms + 200);
        assert_eq!(
            h.game.players[&target].health,
            MAX_HEALTH - combat::BODYSHOT_DAMAGE
        );
    }

    #[test]
    fn lethal_shot_credits_killer_and_broadcasts_kill() {
        let mut h = Harness::new(GameMode::Ffa);
        let (shooter, target, _rx) = line_up_and_go_live(&mut h);
        h.game.players.get_mut(&target).unwrap().health = combat::BODYSHOT_DAMAGE;
        h.drain_events();

        h.game.resolve_shot(shooter, h.now_ms);

        let victim = h.game.players.get(&target).unwrap();
        assert!(!victim.alive);
        assert_eq!(victim.health, 0.0);
        assert_eq!(victim.deaths, 1);
        assert_eq!(h.game.players[&shooter].kills, 1);

        let events = h.drain_events();
        let kill = events.iter().find_map(|m| match m {
            ServerMsg::Killed { killer_name, victim_name, victim_id } => {
                Some((killer_name.clone(), victim_name.clone(), *victim_id))
            }
            _ => None,
        });
        assert_eq!(kill, Some(("Shooter".into(), "Target".into(), target)));
    }

    #[test]
    fn empty_magazine_triggers_reload_instead_of_firing() {
        let mut h = Harness::new(GameMode::Ffa);
        let (shooter, target, _rx) = line_up_and_go_live(&mut h);
        h.game.players.get_mut(&shooter).unwrap().ammo = 0;

        h.game.resolve_shot(shooter, h.now_ms);
        let p = h.game.players.get(&shooter).unwrap();
        assert!(p.reloading);
        assert_eq!(h.game.players[&target].health, MAX_HEALTH);
    }

    #[test]
    fn dry_fire_with_no_reserve_is_a_noop() {
        let mut h = Harness::new(GameMode::Ffa);
        let (shooter, _target, _rx) = line_up_and_go_live(&mut h);
        {
            let p = h.game.players.get_mut(&shooter).unwrap();
            p.ammo = 0;
            p.reserve_ammo = 0;
        }
        h.game.resolve_shot(shooter, h.now_ms);
        let p = h.game.players.get(&shooter).unwrap();
        assert!(!p.reloading);
        assert_eq!(p.reserve_ammo, 0);
    }

    #[test]
    fn timer_pushes_once_per_second_while_live() {
        let mut h = Harness::new(GameMode::Ffa);
        h.join("One");
        h.join("Two");
        h.tick_secs(COUNTDOWN_SECS + 1.0);
        h.drain_events();

        h.tick_secs(3.0);
        let timers = h
            .drain_events()
            .iter()
            .filter(|m| matches!(m, ServerMsg::TimerSync { .. }))
            .count();
        assert_eq!(timers, 3);
    }

    #[test]
    fn respawn_while_dead_and_live_restores_player() {
        let mut h = Harness::new(GameMode::Ffa);
        let (shooter, target, _rx) = line_up_and_go_live(&mut h);
        h.game.players.get_mut(&target).unwrap().health = combat::BODYSHOT_DAMAGE;
        h.game.resolve_shot(shooter, h.now_ms);
        assert!(!h.game.players[&target].alive);

        h.game.handle_cmd(MatchCmd::Respawn { player_id: target });
        let p = h.game.players.get(&target).unwrap();
        assert!(p.alive);
        assert_eq!(p.health, MAX_HEALTH);
        assert_eq!(p.reserve_ammo, RESERVE_CAPACITY);
        assert_eq!(p.deaths, 1);
    }

    #[test]
    fn respawn_while_alive_is_ignored() {
        let mut h = Harness::new(GameMode::Ffa);
        let (shooter, _target, _rx) = line_up_and_go_live(&mut h);
        let before = h.game.players[&shooter].clone();
        h.game.handle_cmd(MatchCmd::Respawn { player_id: shooter });
        let after = &h.game.players[&shooter];
        assert_eq!((before.x, before.z), (after.x, after.z));
    }
}
