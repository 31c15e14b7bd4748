//! Neutral energy pickups.
//!
//! Pickups spawn on a timer up to a concurrent cap, relocate when they age out
//! uncollected, and are consumed by the first craft to touch them: players gain
//! XP, adversary craft feed the adversary economy.

use rand::Rng;

use crate::game::constants::{physics, pickups::*};
use crate::game::simulation::Simulation;
use crate::game::state::{EntityData, EntityId, EntityKind, Team};
use crate::util::vec2::Vec2;

/// Step (g)
pub fn update(sim: &mut Simulation) {
    spawn_on_timer(sim);
    recycle_expired(sim);
    collect(sim);
}

fn random_point(sim: &mut Simulation) -> Vec2 {
    Vec2::new(
        sim.rng
            .gen_range(EDGE_MARGIN..physics::WORLD_WIDTH - EDGE_MARGIN),
        sim.rng
            .gen_range(EDGE_MARGIN..physics::WORLD_HEIGHT - EDGE_MARGIN),
    )
}

fn spawn_on_timer(sim: &mut Simulation) {
    sim.pickup_timer += 1;
    if sim.pickup_timer < SPAWN_INTERVAL {
        return;
    }
    sim.pickup_timer = 0;

    if sim.count_kind(EntityKind::Energy) < MAX_CONCURRENT {
        let position = random_point(sim);
        sim.spawn(EntityKind::Energy, Team::Neutral, position);
    }
}

fn recycle_expired(sim: &mut Simulation) {
    let mut expired: Vec<EntityId> = Vec::new();
    for pickup in sim.entities.values_mut() {
        if let EntityData::Pickup { ttl } = &mut pickup.data {
            *ttl = ttl.saturating_sub(1);
            if *ttl == 0 {
                expired.push(pickup.id);
            }
        }
    }
    expired.sort_unstable();

    for id in expired {
        let position = random_point(sim);
        if let Some(pickup) = sim.entities.get_mut(&id) {
            pickup.position = position;
            pickup.data = EntityData::Pickup { ttl: LIFETIME };
        }
    }
}

fn collect(sim: &mut Simulation) {
    let ids = sim.sorted_ids();
    let mut collected: Vec<(EntityId, EntityId)> = Vec::new();

    for &pickup_id in &ids {
        let Some(pickup) = sim.entities.get(&pickup_id) else {
            continue;
        };
        if !pickup.kind.is_pickup() {
            continue;
        }

        // Players first, then adversary craft
        let collector = ids
            .iter()
            .filter_map(|id| sim.entities.get(id))
            .filter(|e| e.kind == EntityKind::Player && e.is_alive())
            .chain(
                ids.iter()
                    .filter_map(|id| sim.entities.get(id))
                    .filter(|e| e.kind.is_adversary_craft() && e.is_alive()),
            )
            .find(|e| e.overlaps(pickup));

        if let Some(collector) = collector {
            collected.push((pickup_id, collector.id));
        }
    }

    for (pickup_id, collector_id) in collected {
        sim.entities.remove(&pickup_id);
        let is_player = sim
            .entities
            .get(&collector_id)
            .is_some_and(|e| e.kind == EntityKind::Player);

        if is_player {
            if let Some(session) = sim.session_for_entity_mut(collector_id) {
                session.grant_xp(XP_VALUE);
            }
        } else {
            sim.adversary_income += RESOURCE_VALUE;
        }
    }
}
