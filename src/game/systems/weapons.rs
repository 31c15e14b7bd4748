//! Weapon firing for player craft and adversary units
//!
//! Every shot becomes a projectile entity that records its owner and the point
//! it was fired from. Cooldowns are per ability and count down once per tick.

use smallvec::SmallVec;

use crate::game::constants::{ai, progression, weapons::*};
use crate::game::simulation::Simulation;
use crate::game::state::{Entity, EntityData, EntityId, EntityKind, ProjectileData, Team};
use crate::util::vec2::Vec2;

/// Projectile parameters for one shot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotSpec {
    pub kind: EntityKind,
    pub speed: f32,
    pub damage: f32,
    pub ttl: u32,
    pub radius: f32,
}

impl ShotSpec {
    pub fn bullet(damage_multiplier: f32) -> Self {
        Self {
            kind: EntityKind::Bullet,
            speed: BULLET_SPEED,
            damage: BULLET_DAMAGE * damage_multiplier,
            ttl: BULLET_TTL,
            radius: BULLET_RADIUS,
        }
    }

    pub fn missile(damage_multiplier: f32) -> Self {
        Self {
            kind: EntityKind::Missile,
            speed: MISSILE_SPEED,
            damage: MISSILE_DAMAGE * damage_multiplier,
            ttl: MISSILE_TTL,
            radius: MISSILE_RADIUS,
        }
    }

    /// Stationary hazard dropped at the owner's position
    pub fn mine(damage: f32) -> Self {
        Self {
            kind: EntityKind::Mine,
            speed: 0.0,
            damage,
            ttl: MINE_TTL,
            radius: MINE_RADIUS,
        }
    }

    pub fn enemy_bullet(damage: f32, speed: f32) -> Self {
        Self {
            kind: EntityKind::Bullet,
            speed,
            damage,
            ttl: ai::ENEMY_BULLET_TTL,
            radius: ai::ENEMY_BULLET_RADIUS,
        }
    }
}

/// Spawn one projectile from `owner` along `angle`
///
/// Moving shots start just outside the owner's hull; mines are dropped in place.
pub fn fire(
    sim: &mut Simulation,
    owner: EntityId,
    team: Team,
    origin: Vec2,
    owner_radius: f32,
    angle: f32,
    spec: ShotSpec,
) -> EntityId {
    let direction = Vec2::from_angle(angle);
    let position = if spec.speed > 0.0 {
        origin + direction * (owner_radius + spec.radius)
    } else {
        origin
    };

    let mut projectile = Entity::new(0, spec.kind, team, position);
    projectile.velocity = direction * spec.speed;
    projectile.radius = spec.radius;
    projectile.data = EntityData::Projectile(ProjectileData {
        owner,
        origin: position,
        damage: spec.damage,
        ttl: spec.ttl,
    });
    sim.spawn_entity(projectile)
}

/// Barrel angles for `cannons` mounts centred on `aim`
pub fn spread_angles(aim: f32, cannons: u32) -> SmallVec<[f32; 4]> {
    let count = cannons.clamp(1, progression::MAX_CANNONS);
    let center = (count - 1) as f32 / 2.0;
    (0..count)
        .map(|i| aim + (i as f32 - center) * SPREAD_STEP)
        .collect()
}

struct Volley {
    owner: EntityId,
    origin: Vec2,
    radius: f32,
    angles: SmallVec<[f32; 4]>,
    spec: ShotSpec,
}

/// Step (b): resolve fire requests from every player with a live craft
pub fn fire_player_weapons(sim: &mut Simulation) {
    let mut volleys: Vec<Volley> = Vec::new();

    let mut player_ids: Vec<_> = sim.sessions.keys().copied().collect();
    player_ids.sort_unstable();

    for player_id in player_ids {
        let Some(session) = sim.sessions.get_mut(&player_id) else {
            continue;
        };
        let Some(craft) = session.entity_id.and_then(|id| sim.entities.get(&id)) else {
            continue;
        };
        let input = session.input;
        let multiplier = session.damage_multiplier();

        if input.fire && session.cooldowns.bullet == 0 {
            session.cooldowns.bullet = session.bullet_cooldown();
            volleys.push(Volley {
                owner: craft.id,
                origin: craft.position,
                radius: craft.radius,
                angles: spread_angles(input.aim, session.cannons),
                spec: ShotSpec::bullet(multiplier),
            });
        }

        if input.missile && session.cooldowns.missile == 0 {
            session.cooldowns.missile = MISSILE_COOLDOWN;
            volleys.push(Volley {
                owner: craft.id,
                origin: craft.position,
                radius: craft.radius,
                angles: SmallVec::from_slice(&[input.aim]),
                spec: ShotSpec::missile(multiplier),
            });
        }

        if input.mine && session.cooldowns.mine == 0 {
            session.cooldowns.mine = MINE_COOLDOWN;
            volleys.push(Volley {
                owner: craft.id,
                origin: craft.position,
                radius: craft.radius,
                angles: SmallVec::from_slice(&[0.0]),
                spec: ShotSpec::mine(MINE_DAMAGE * multiplier),
            });
        }
    }

    for volley in volleys {
        for angle in volley.angles {
            fire(
                sim,
                volley.owner,
                Team::Players,
                volley.origin,
                volley.radius,
                angle,
                volley.spec,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::PlayerInput;
    use uuid::Uuid;

    fn projectiles(sim: &Simulation, kind: EntityKind) -> Vec<&Entity> {
        sim.entities_of_kind(kind).collect()
    }

    #[test]
    fn test_spread_is_centred() {
        let single = spread_angles(1.0, 1);
        assert_eq!(single.as_slice(), &[1.0]);

        let triple = spread_angles(0.0, 3);
        assert_eq!(triple.len(), 3);
        assert!((triple[0] + SPREAD_STEP).abs() < 1e-6);
        assert!(triple[1].abs() < 1e-6);
        assert!((triple[2] - SPREAD_STEP).abs() < 1e-6);

        assert_eq!(spread_angles(0.0, 99).len(), progression::MAX_CANNONS as usize);
    }

    #[test]
    fn test_fire_records_owner_and_origin() {
        let mut sim = Simulation::new(1);
        let player_id = Uuid::new_v4();
        let craft_id = sim.add_player(player_id);
        sim.set_input(
            player_id,
            PlayerInput {
                fire: true,
                ..Default::default()
            },
        );

        fire_player_weapons(&mut sim);

        let bullets = projectiles(&sim, EntityKind::Bullet);
        assert_eq!(bullets.len(), 1);
        let data = bullets[0].projectile().unwrap();
        assert_eq!(data.owner, craft_id);
        assert_eq!(data.origin, bullets[0].position);
        assert_eq!(data.damage, BULLET_DAMAGE);
        assert_eq!(bullets[0].team, Team::Players);
    }

    #[test]
    fn test_cooldown_gates_fire() {
        let mut sim = Simulation::new(1);
        let player_id = Uuid::new_v4();
        sim.add_player(player_id);
        sim.set_input(
            player_id,
            PlayerInput {
                fire: true,
                missile: true,
                mine: true,
                ..Default::default()
            },
        );

        fire_player_weapons(&mut sim);
        fire_player_weapons(&mut sim);

        assert_eq!(projectiles(&sim, EntityKind::Bullet).len(), 1);
        assert_eq!(projectiles(&sim, EntityKind::Missile).len(), 1);
        assert_eq!(projectiles(&sim, EntityKind::Mine).len(), 1);

        let cooldowns = sim.session(player_id).unwrap().cooldowns;
        assert_eq!(cooldowns.bullet, BULLET_COOLDOWN);
        assert_eq!(cooldowns.missile, MISSILE_COOLDOWN);
        assert_eq!(cooldowns.mine, MINE_COOLDOWN);
    }

    #[test]
    fn test_multi_cannon_volley() {
        let mut sim = Simulation::new(1);
        let player_id = Uuid::new_v4();
        sim.add_player(player_id);
        sim.sessions.get_mut(&player_id).unwrap().cannons = 3;
        sim.set_input(
            player_id,
            PlayerInput {
                fire: true,
                ..Default::default()
            },
        );

        fire_player_weapons(&mut sim);
        assert_eq!(projectiles(&sim, EntityKind::Bullet).len(), 3);
    }

    #[test]
    fn test_no_craft_no_fire() {
        let mut sim = Simulation::new(1);
        let player_id = Uuid::new_v4();
        sim.add_player(player_id);
        sim.despawn_player(player_id);
        sim.set_input(
            player_id,
            PlayerInput {
                fire: true,
                ..Default::default()
            },
        );

        fire_player_weapons(&mut sim);
        assert!(projectiles(&sim, EntityKind::Bullet).is_empty());
    }

    #[test]
    fn test_mine_is_stationary() {
        let mut sim = Simulation::new(1);
        let id = fire(
            &mut sim,
            1,
            Team::Adversary,
            Vec2::new(300.0, 300.0),
            24.0,
            1.0,
            ShotSpec::mine(10.0),
        );
        let mine = sim.entity(id).unwrap();
        assert_eq!(mine.position, Vec2::new(300.0, 300.0));
        assert_eq!(mine.velocity, Vec2::ZERO);
    }
}
