//! Damage resolution: projectile hits, body contact, and kill credit.

use smallvec::SmallVec;
use tracing::debug;

use crate::game::constants::combat::*;
use crate::game::simulation::Simulation;
use crate::game::state::{Entity, EntityData, EntityId, EntityKind};
use crate::util::vec2::Vec2;

/// A lethal hit credited to the entity that fired it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kill {
    pub killer: EntityId,
    pub victim: EntityId,
    pub victim_kind: EntityKind,
}

/// Damage that actually lands on `target` from a hit originating at `source`
///
/// Tanks take only `FRONT_ARMOR_FACTOR` of the damage when the source lies
/// inside the frontal arc around their facing.
pub fn armored_damage(target: &Entity, source: Vec2, damage: f32) -> f32 {
    let Some(facing) = target.facing() else {
        return damage;
    };
    let to_source = source - target.position;
    if to_source.length_sq() == 0.0 {
        return damage;
    }
    let facing_dir = Vec2::from_angle(facing);
    if facing_dir.angle_to(to_source).abs() <= FRONT_ARC_HALF_ANGLE {
        damage * FRONT_ARMOR_FACTOR
    } else {
        damage
    }
}

/// Steps (d) and (e): apply all overlaps for this tick and award kill XP
pub fn resolve(sim: &mut Simulation) -> SmallVec<[Kill; 8]> {
    let ids = sim.sorted_ids();
    let mut kills: SmallVec<[Kill; 8]> = SmallVec::new();

    resolve_projectiles(sim, &ids, &mut kills);
    resolve_body_contact(sim, &ids);

    for kill in &kills {
        award_kill(sim, kill);
    }
    kills
}

fn resolve_projectiles(sim: &mut Simulation, ids: &[EntityId], kills: &mut SmallVec<[Kill; 8]>) {
    for &projectile_id in ids {
        let Some(projectile) = sim.entities.get(&projectile_id) else {
            continue;
        };
        let Some(data) = projectile.projectile().copied() else {
            continue;
        };

        let target_id = ids.iter().copied().find(|id| {
            sim.entities.get(id).is_some_and(|target| {
                target.kind.is_combatant()
                    && target.is_alive()
                    && projectile.team.opposes(target.team)
                    && projectile.overlaps(target)
            })
        });
        let Some(target_id) = target_id else {
            continue;
        };

        sim.entities.remove(&projectile_id);
        let Some(target) = sim.entities.get_mut(&target_id) else {
            continue;
        };
        let damage = armored_damage(target, data.origin, data.damage);
        target.apply_damage(damage);

        let shielded = matches!(target.data, EntityData::Boss { shielded: true });
        if !target.is_alive() && !shielded {
            kills.push(Kill {
                killer: data.owner,
                victim: target_id,
                victim_kind: target.kind,
            });
        }
    }
}

/// Flat contact damage while a player craft overlaps adversary craft or a boss.
/// Drones and guards take the same damage back.
fn resolve_body_contact(sim: &mut Simulation, ids: &[EntityId]) {
    let mut hits: SmallVec<[(EntityId, EntityId, bool); 8]> = SmallVec::new();

    for &player_id in ids {
        let Some(player) = sim.entities.get(&player_id) else {
            continue;
        };
        if player.kind != EntityKind::Player || !player.is_alive() {
            continue;
        }
        for &other_id in ids {
            let Some(other) = sim.entities.get(&other_id) else {
                continue;
            };
            let contact_kind = other.kind.is_adversary_craft() || other.kind.is_boss();
            if contact_kind && other.is_alive() && player.overlaps(other) {
                let reciprocal = matches!(other.kind, EntityKind::Drone | EntityKind::Guard);
                hits.push((player_id, other_id, reciprocal));
            }
        }
    }

    for (player_id, other_id, reciprocal) in hits {
        if let Some(player) = sim.entities.get_mut(&player_id) {
            player.apply_damage(BODY_COLLISION_DAMAGE);
        }
        if reciprocal {
            if let Some(other) = sim.entities.get_mut(&other_id) {
                other.apply_damage(BODY_COLLISION_DAMAGE);
            }
        }
    }
}

/// Credit XP to the player session whose craft fired the lethal shot
fn award_kill(sim: &mut Simulation, kill: &Kill) {
    let xp = kill.victim_kind.kill_xp();
    let Some(session) = sim.session_for_entity_mut(kill.killer) else {
        return;
    };
    session.kills += 1;
    let levels = session.grant_xp(xp);
    debug!(
        player_id = %session.player_id,
        victim = ?kill.victim_kind,
        xp,
        level = session.level,
        levels_gained = levels,
        "kill credited"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{ProjectileData, Team};
    use std::f32::consts::PI;
    use uuid::Uuid;

    fn bullet_at(
        sim: &mut Simulation,
        owner: EntityId,
        team: Team,
        position: Vec2,
        damage: f32,
    ) -> EntityId {
        let mut bullet = Entity::new(0, EntityKind::Bullet, team, position);
        bullet.data = EntityData::Projectile(ProjectileData {
            owner,
            origin: position,
            damage,
            ttl: 10,
        });
        sim.spawn_entity(bullet)
    }

    #[test]
    fn test_lethal_hit_awards_xp_once_to_owner() {
        let mut sim = Simulation::new(1);
        let shooter = Uuid::new_v4();
        let bystander = Uuid::new_v4();
        let craft = sim.add_player(shooter);
        sim.add_player(bystander);

        let drone = sim.spawn(EntityKind::Drone, Team::Adversary, Vec2::new(1000.0, 1000.0));
        sim.entity_mut(drone).unwrap().hp = 10.0;
        bullet_at(&mut sim, craft, Team::Players, Vec2::new(1000.0, 1000.0), 10.0);
        bullet_at(&mut sim, craft, Team::Players, Vec2::new(1001.0, 1000.0), 10.0);

        let kills = resolve(&mut sim);

        assert_eq!(kills.len(), 1);
        assert_eq!(kills[0].victim, drone);
        assert_eq!(sim.session(shooter).unwrap().xp, EntityKind::Drone.kill_xp());
        assert_eq!(sim.session(shooter).unwrap().kills, 1);
        assert_eq!(sim.session(bystander).unwrap().xp, 0);
        // second bullet found no live target and stays in flight
        assert_eq!(sim.count_kind(EntityKind::Bullet), 1);
    }

    #[test]
    fn test_non_lethal_hit_consumes_projectile_without_xp() {
        let mut sim = Simulation::new(1);
        let shooter = Uuid::new_v4();
        let craft = sim.add_player(shooter);
        let tower = sim.spawn(EntityKind::Tower, Team::Adversary, Vec2::new(1000.0, 1000.0));
        bullet_at(&mut sim, craft, Team::Players, Vec2::new(1000.0, 1000.0), 10.0);

        let kills = resolve(&mut sim);

        assert!(kills.is_empty());
        assert_eq!(sim.entity(tower).unwrap().hp, 190.0);
        assert_eq!(sim.count_kind(EntityKind::Bullet), 0);
        assert_eq!(sim.session(shooter).unwrap().xp, 0);
    }

    #[test]
    fn test_friendly_projectiles_pass_through() {
        let mut sim = Simulation::new(1);
        let drone = sim.spawn(EntityKind::Drone, Team::Adversary, Vec2::new(500.0, 500.0));
        bullet_at(&mut sim, drone, Team::Adversary, Vec2::new(500.0, 500.0), 10.0);

        resolve(&mut sim);

        assert_eq!(sim.entity(drone).unwrap().hp, 30.0);
        assert_eq!(sim.count_kind(EntityKind::Bullet), 1);
    }

    #[test]
    fn test_tank_frontal_armor() {
        let mut tank = Entity::new(1, EntityKind::Tank, Team::Adversary, Vec2::new(0.0, 0.0));
        tank.data = EntityData::Armored { facing: 0.0 };

        let front = armored_damage(&tank, Vec2::new(100.0, 10.0), 10.0);
        let side = armored_damage(&tank, Vec2::new(0.0, 100.0), 10.0);
        let rear = armored_damage(&tank, Vec2::new(-100.0, 0.0), 10.0);

        assert!((front - 10.0 * FRONT_ARMOR_FACTOR).abs() < 1e-5);
        assert_eq!(side, 10.0);
        assert_eq!(rear, 10.0);

        tank.data = EntityData::Armored { facing: PI };
        assert!((armored_damage(&tank, Vec2::new(-100.0, 0.0), 10.0) - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_shielded_boss_grants_no_xp() {
        let mut sim = Simulation::new(1);
        let shooter = Uuid::new_v4();
        let craft = sim.add_player(shooter);
        let boss = sim.spawn(EntityKind::Boss, Team::Adversary, Vec2::new(1600.0, 500.0));
        {
            let boss = sim.entity_mut(boss).unwrap();
            boss.hp = 5.0;
            boss.data = EntityData::Boss { shielded: true };
        }
        bullet_at(&mut sim, craft, Team::Players, Vec2::new(1600.0, 500.0), 10.0);

        let kills = resolve(&mut sim);
        assert!(kills.is_empty());
        assert_eq!(sim.session(shooter).unwrap().xp, 0);
    }

    #[test]
    fn test_body_contact_damage() {
        let mut sim = Simulation::new(1);
        let player_id = Uuid::new_v4();
        let craft = sim.add_player(player_id);
        let position = sim.entity(craft).unwrap().position;
        let drone = sim.spawn(EntityKind::Drone, Team::Adversary, position);
        let tank = sim.spawn(EntityKind::Tank, Team::Adversary, position);

        resolve(&mut sim);

        assert_eq!(sim.entity(craft).unwrap().hp, 100.0 - 2.0 * BODY_COLLISION_DAMAGE);
        assert_eq!(sim.entity(drone).unwrap().hp, 30.0 - BODY_COLLISION_DAMAGE);
        assert_eq!(sim.entity(tank).unwrap().hp, 150.0);
    }
}
