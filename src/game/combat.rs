//! Hitscan combat resolution

use uuid::Uuid;

use crate::ws::protocol::GameMode;

use super::session::PlayerSession;

/// Minimum time between shots: 100 ms, i.e. 600 rounds per minute.
/// A shot exactly at the boundary is accepted.
pub const FIRE_INTERVAL_MS: u64 = 100;
/// Hitscan reaches at most this far
pub const MAX_RANGE: f32 = 100.0;
/// Cosine threshold for the aim cone. A dot product above this between the
/// shooter's forward vector and the normalized shooter-to-target vector
/// counts as on-target. Deliberately a cone, not a true ray; clients were
/// tuned against this exact behavior.
pub const CONE_COS_THRESHOLD: f32 = 0.99;
/// Vertical offset of the eye line used for the headshot band
pub const EYE_LINE_OFFSET: f32 = 0.8;
/// Half-height of the headshot band around the eye line
pub const HEADSHOT_BAND: f32 = 0.3;
pub const HEADSHOT_DAMAGE: f32 = 50.0;
pub const BODYSHOT_DAMAGE: f32 = 25.0;

/// Outcome of a resolved shot that found a target
#[derive(Debug, Clone, Copy)]
pub struct HitOutcome {
    pub target_id: Uuid,
    pub headshot: bool,
    pub damage: f32,
    pub distance: f32,
}

/// Whether enough time has passed since the player's last shot
pub fn fire_rate_allows(last_shot_ms: u64, now_ms: u64) -> bool {
    now_ms.saturating_sub(last_shot_ms) >= FIRE_INTERVAL_MS
}

/// Forward direction from view angles. Yaw 0 faces +z; positive pitch looks
/// down, so the y component is negated.
pub fn forward_dir(yaw: f32, pitch: f32) -> (f32, f32, f32) {
    (
        yaw.sin() * pitch.cos(),
        -pitch.sin(),
        yaw.cos() * pitch.cos(),
    )
}

/// Scan all candidates for the closest one inside the shooter's aim cone.
/// Candidates must be alive, not the shooter, and in teams mode not on the
/// shooter's team. At most one target is hit per shot.
pub fn find_hit<'a>(
    shooter: &PlayerSession,
    mode: GameMode,
    candidates: impl Iterator<Item = &'a PlayerSession>,
) -> Option<HitOutcome> {
    let dir = forward_dir(shooter.yaw, shooter.pitch);

    let mut closest: Option<HitOutcome> = None;
    let mut closest_distance = f32::INFINITY;

    for target in candidates {
        if target.id == shooter.id || !target.alive {
            continue;
        }
        if mode == GameMode::Teams && target.team == shooter.team {
            continue;
        }

        let to = (
            target.x - shooter.x,
            target.y - shooter.y,
            target.z - shooter.z,
        );
        let distance = (to.0 * to.0 + to.1 * to.1 + to.2 * to.2).sqrt();
        if distance <= 0.0 || distance >= MAX_RANGE {
            continue;
        }

        let dot = (to.0 * dir.0 + to.1 * dir.1 + to.2 * dir.2) / distance;
        if dot > CONE_COS_THRESHOLD && distance < closest_distance {
            let headshot = (to.1 - EYE_LINE_OFFSET).abs() < HEADSHOT_BAND;
            closest = Some(HitOutcome {
                target_id: target.id,
                headshot,
                damage: if headshot { HEADSHOT_DAMAGE } else { BODYSHOT_DAMAGE },
                distance,
            });
            closest_distance = distance;
        }
    }

    closest
}
