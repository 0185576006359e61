//! Lobby registry - creates, indexes, and destroys matches

use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::{GameMatch, JoinError, MatchCmd, MatchHandle};
use crate::ws::protocol::{GameMode, ServerMsg};

/// Match codes are 6 characters from a fixed alphabet, unique while live
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 6;

/// Process-wide registry of live matches, owned by the application state and
/// handed to the network layer at startup. The code → handle map is the only
/// state shared between join/leave flows and match tasks; every operation on
/// it is a single atomic map access.
pub struct LobbyRegistry {
    matches: Arc<DashMap<String, MatchHandle>>,
    max_players_per_match: usize,
}

impl LobbyRegistry {
    pub fn new(max_players_per_match: usize) -> Self {
        Self {
            matches: Arc::new(DashMap::new()),
            max_players_per_match,
        }
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches.iter().map(|m| m.value().player_count()).sum()
    }

    /// Open matchmaking: route the player into the first match accepting
    /// players, or spin up a fresh one. A match that fills up between the
    /// scan and the join answers `Full`, and the scan moves on; the
    /// create-new fallback makes this path infallible short of shutdown.
    pub async fn quick_join(
        &self,
        player_id: Uuid,
        name: String,
        outbox: mpsc::Sender<ServerMsg>,
    ) -> Result<(MatchHandle, broadcast::Receiver<ServerMsg>), JoinError> {
        let candidates: Vec<MatchHandle> = self
            .matches
            .iter()
            .filter(|entry| entry.value().accepts_players())
            .map(|entry| entry.value().clone())
            .collect();

        for handle in candidates {
            match join_match(&handle, player_id, name.clone(), outbox.clone()).await {
                Ok(events) => return Ok((handle, events)),
                Err(err) => {
                    debug!(
                        match_code = %handle.code,
                        error = %err,
                        "Candidate match refused join, trying next"
                    );
                }
            }
        }

        let handle = self.create_match();
        let events = join_match(&handle, player_id, name, outbox).await?;
        Ok((handle, events))
    }

    /// Join one exact match by code. No fallback: a full or unknown code is
    /// a terminal error for this attempt.
    pub async fn join_by_code(
        &self,
        code: &str,
        player_id: Uuid,
        name: String,
        outbox: mpsc::Sender<ServerMsg>,
    ) -> Result<(MatchHandle, broadcast::Receiver<ServerMsg>), JoinError> {
        let normalized = code.trim().to_uppercase();
        let handle = self
            .matches
            .get(&normalized)
            .map(|entry| entry.value().clone())
            .ok_or(JoinError::NotFound)?;

        let events = join_match(&handle, player_id, name, outbox).await?;
        Ok((handle, events))
    }

    /// Create a match with a fresh unique code, random mode and map, and
    /// spawn its tick task. The task removes the registry entry when it
    /// shuts down, freeing the code for reuse.
    fn create_match(&self) -> MatchHandle {
        let code = self.generate_code();
        let seed = rand::random::<u64>();
        let mode = if rand::thread_rng().gen_bool(0.5) {
            GameMode::Teams
        } else {
            GameMode::Ffa
        };

        let (game_match, handle) =
            GameMatch::new(code.clone(), mode, seed, self.max_players_per_match);
        self.matches.insert(code.clone(), handle.clone());

        info!(match_code = %code, mode = ?mode, "Created new match");

        let matches = self.matches.clone();
        tokio::spawn(async move {
            game_match.run().await;
            matches.remove(&code);
            info!(match_code = %code, "Match removed from registry");
        });

        handle
    }

    /// ~2×10⁹ possible codes make collision retries effectively free
    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..CODE_LEN)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            if !self.matches.contains_key(&code) {
                return code;
            }
        }
    }
}

/// Send a join command and wait for the match task's verdict. On success
/// the returned event receiver was subscribed before the command was sent,
/// so every broadcast the join triggers (countdown start, other joins) is
/// already buffered for this player. A closed channel means the match task
/// is gone (shutting down or already removed).
async fn join_match(
    handle: &MatchHandle,
    player_id: Uuid,
    name: String,
    outbox: mpsc::Sender<ServerMsg>,
) -> Result<broadcast::Receiver<ServerMsg>, JoinError> {
    let events = handle.subscribe();

    let (reply_tx, reply_rx) = oneshot::channel();
    handle
        .cmd_tx
        .send(MatchCmd::Join {
            player_id,
            name,
            outbox,
            reply: reply_tx,
        })
        .await
        .map_err(|_| JoinError::Closed)?;

    reply_rx.await.map_err(|_| JoinError::Closed)??;
    Ok(events)
}
