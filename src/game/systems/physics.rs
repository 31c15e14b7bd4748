use rayon::prelude::*;

use crate::game::constants::{physics::*, player, weapons};
use crate::game::simulation::Simulation;
use crate::game::state::{EntityData, EntityId, EntityKind};
use crate::util::vec2::Vec2;

/// Step player velocities toward their input
///
/// Held direction accelerates toward `max_speed`; no input brakes toward rest.
/// Also counts down ability cooldowns.
pub fn apply_player_input(sim: &mut Simulation) {
    for session in sim.sessions.values_mut() {
        session.cooldowns.tick();

        let Some(craft) = session.entity_id.and_then(|id| sim.entities.get_mut(&id)) else {
            continue;
        };

        let direction = session.input.direction();
        craft.velocity = if direction == Vec2::ZERO {
            craft.velocity.move_toward(Vec2::ZERO, player::BRAKE)
        } else {
            craft
                .velocity
                .move_toward(direction * session.max_speed(), player::ACCELERATION)
        };
    }
}

/// Integrate every non-projectile entity and clamp it inside the world
pub fn integrate_craft(sim: &mut Simulation) {
    sim.entities.par_values_mut().for_each(|entity| {
        if entity.kind.is_projectile() || entity.velocity == Vec2::ZERO {
            return;
        }
        entity.position += entity.velocity;

        let min = Vec2::new(entity.radius, entity.radius);
        let max = Vec2::new(WORLD_WIDTH - entity.radius, WORLD_HEIGHT - entity.radius);
        let clamped = entity.position.clamp_to(min, max);
        if clamped.x != entity.position.x {
            entity.velocity.x = 0.0;
        }
        if clamped.y != entity.position.y {
            entity.velocity.y = 0.0;
        }
        entity.position = clamped;
    });
}

/// Steer missiles, move every projectile, and drop expired or escaped ones
pub fn integrate_projectiles(sim: &mut Simulation) {
    steer_missiles(sim);

    sim.entities.par_values_mut().for_each(|entity| {
        if let EntityData::Projectile(projectile) = &mut entity.data {
            entity.position += entity.velocity;
            projectile.ttl = projectile.ttl.saturating_sub(1);
        }
    });

    sim.entities.retain(|_, entity| match &entity.data {
        EntityData::Projectile(projectile) => projectile.ttl > 0 && in_bounds(entity.position),
        _ => true,
    });
}

/// Turn each missile's heading toward its nearest opponent by at most the turn rate
fn steer_missiles(sim: &mut Simulation) {
    let mut headings: Vec<(EntityId, Vec2)> = Vec::new();

    for missile in sim.entities.values() {
        if missile.kind != EntityKind::Missile {
            continue;
        }
        let Some(target) = sim.nearest_opponent(missile.position, missile.team) else {
            continue;
        };
        let desired = target.position - missile.position;
        if desired.length_sq() == 0.0 || missile.velocity.length_sq() == 0.0 {
            continue;
        }
        let turn = missile
            .velocity
            .angle_to(desired)
            .clamp(-weapons::MISSILE_TURN_RATE, weapons::MISSILE_TURN_RATE);
        headings.push((missile.id, missile.velocity.rotate(turn)));
    }

    for (id, velocity) in headings {
        if let Some(missile) = sim.entities.get_mut(&id) {
            missile.velocity = velocity;
        }
    }
}

fn in_bounds(position: Vec2) -> bool {
    position.x >= -OUT_OF_BOUNDS_MARGIN
        && position.y >= -OUT_OF_BOUNDS_MARGIN
        && position.x <= WORLD_WIDTH + OUT_OF_BOUNDS_MARGIN
        && position.y <= WORLD_HEIGHT + OUT_OF_BOUNDS_MARGIN
}

/// Repair non-finite positions, velocities and HP
pub fn sanitize(sim: &mut Simulation) {
    let center = Vec2::new(WORLD_WIDTH / 2.0, WORLD_HEIGHT / 2.0);
    for entity in sim.entities.values_mut() {
        if !entity.position.is_finite() {
            tracing::warn!(entity_id = entity.id, kind = ?entity.kind, "non-finite position reset");
            entity.position = center;
        }
        if !entity.velocity.is_finite() {
            entity.velocity = Vec2::ZERO;
        }
        if !entity.hp.is_finite() {
            entity.hp = 0.0;
        }
    }
}
