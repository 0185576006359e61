//! End-of-match ranking and scoreboard assembly

use std::collections::HashMap;
use uuid::Uuid;

use crate::ws::protocol::{GameMode, Scoreboard, ScoreRow, Team};

use super::session::PlayerSession;

/// Kill/death ratio: raw kills when the player never died, otherwise
/// kills/deaths rounded to 2 decimals.
pub fn kd_ratio(kills: u32, deaths: u32) -> f32 {
    if deaths == 0 {
        kills as f32
    } else {
        (kills as f32 / deaths as f32 * 100.0).round() / 100.0
    }
}

/// Rank players by kills descending and determine the winner. In ffa the
/// winner is the top player, or DRAW when the top two are tied; in teams the
/// team with more summed kills wins, or DRAW on a tie.
pub fn build(mode: GameMode, players: &HashMap<Uuid, PlayerSession>) -> Scoreboard {
    let mut ranked: Vec<&PlayerSession> = players.values().collect();
    // Name as tie-break keeps ranks deterministic across runs
    ranked.sort_by(|a, b| b.kills.cmp(&a.kills).then_with(|| a.name.cmp(&b.name)));

    let winner = match mode {
        GameMode::Ffa => match ranked.as_slice() {
            [] => "No Winner".to_string(),
            [only] => only.name.clone(),
            [first, second, ..] => {
                if first.kills == second.kills {
                    "DRAW".to_string()
                } else {
                    first.name.clone()
                }
            }
        },
        GameMode::Teams => {
            let team_kills = |team: Team| -> u32 {
                ranked
                    .iter()
                    .filter(|p| p.team == Some(team))
                    .map(|p| p.kills)
                    .sum()
            };
            let alpha = team_kills(Team::Alpha);
            let omega = team_kills(Team::Omega);
            match alpha.cmp(&omega) {
                std::cmp::Ordering::Greater => Team::Alpha.display_name().to_string(),
                std::cmp::Ordering::Less => Team::Omega.display_name().to_string(),
                std::cmp::Ordering::Equal => "DRAW".to_string(),
            }
        }
    };

    let rows = ranked
        .iter()
        .enumerate()
        .map(|(idx, p)| ScoreRow {
            rank: (idx + 1) as u32,
            name: p.name.clone(),
            team: p.team,
            kills: p.kills,
            deaths: p.deaths,
            kd: kd_ratio(p.kills, p.deaths),
        })
        .collect();

    Scoreboard { winner, mode, rows }
}
