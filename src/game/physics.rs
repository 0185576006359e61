//! Player movement integration and world constraints

use super::session::PlayerSession;

/// Fixed walk speed in units per second
pub const WALK_SPEED: f32 = 5.0;
/// Downward acceleration in units per second squared
pub const GRAVITY: f32 = 20.0;
/// Vertical impulse applied on a grounded jump
pub const JUMP_SPEED: f32 = 8.0;
/// Radians of rotation per unit of mouse delta
pub const MOUSE_SENSITIVITY: f32 = 0.002;
/// Horizontal play area is a square clamped to ±WORLD_BOUND
pub const WORLD_BOUND: f32 = 50.0;
/// Pitch never exceeds straight up or straight down
pub const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2;

/// Integrates one simulation tick for an alive player: horizontal velocity
/// from the held keys projected onto yaw, gravity and jumping, position, then
/// view rotation from the consumed mouse delta, then world-bounds clamping.
pub fn integrate(player: &mut PlayerSession, dt: f32) {
    let keys = player.input.keys;

    // Horizontal velocity is derived fresh each tick; there is no inertia
    let (fwd_x, fwd_z) = (player.yaw.sin(), player.yaw.cos());
    let (right_x, right_z) = (player.yaw.cos(), -player.yaw.sin());

    player.vel_x = 0.0;
    player.vel_z = 0.0;
    if keys.forward {
        player.vel_x += fwd_x * WALK_SPEED;
        player.vel_z += fwd_z * WALK_SPEED;
    }
    if keys.back {
        player.vel_x -= fwd_x * WALK_SPEED;
        player.vel_z -= fwd_z * WALK_SPEED;
    }
    if keys.left {
        player.vel_x -= right_x * WALK_SPEED;
        player.vel_z -= right_z * WALK_SPEED;
    }
    if keys.right {
        player.vel_x += right_x * WALK_SPEED;
        player.vel_z += right_z * WALK_SPEED;
    }

    // Gravity while airborne; jump impulse only from the ground
    if player.y > 0.0 {
        player.vel_y -= GRAVITY * dt;
        player.grounded = false;
    } else {
        player.vel_y = 0.0;
        player.y = 0.0;
        player.grounded = true;
        if keys.jump {
            player.vel_y = JUMP_SPEED;
            player.grounded = false;
        }
    }

    player.x += player.vel_x * dt;
    player.y += player.vel_y * dt;
    player.z += player.vel_z * dt;

    // View rotation from accumulated mouse delta, consumed exactly once
    let (mouse_dx, mouse_dy) = (player.input.mouse_dx, player.input.mouse_dy);
    player.input.mouse_dx = 0.0;
    player.input.mouse_dy = 0.0;
    player.yaw += mouse_dx * MOUSE_SENSITIVITY;
    player.pitch = (player.pitch + mouse_dy * MOUSE_SENSITIVITY).clamp(-PITCH_LIMIT, PITCH_LIMIT);

    // World bounds: square play area, hard floor
    player.x = player.x.clamp(-WORLD_BOUND, WORLD_BOUND);
    player.z = player.z.clamp(-WORLD_BOUND, WORLD_BOUND);
    player.y = player.y.max(0.0);
}
