use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::f32::consts::TAU;

use crate::game::constants::ai::*;
use crate::game::simulation::Simulation;
use crate::game::state::{EntityData, EntityId, EntityKind};
use crate::game::systems::weapons::{self, ShotSpec};
use crate::util::vec2::Vec2;
use crate::util::FxMap;

/// Behavior mode of one AI-controlled entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiMode {
    /// Circle the home point at reduced speed
    Patrol,
    /// Close in on the nearest opponent
    Chase,
    /// Hold stand-off range, strafe and fire
    OrbitFire,
    /// Hold the far side of the guarded point from the threat
    Flank,
    ReturnToBase,
}

/// Burst fire: `count` shots `interval` ticks apart, then `recovery` ticks
#[derive(Debug, Clone, Copy)]
pub struct BurstProfile {
    pub count: u32,
    pub interval: u32,
    pub recovery: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct MineProfile {
    pub interval_ticks: u64,
    pub damage: f32,
}

/// Per-kind tuning
#[derive(Debug, Clone, Copy)]
pub struct AiProfile {
    pub speed: f32,
    pub aggro_radius: f32,
    pub deaggro_radius: f32,
    pub weapon_range: f32,
    pub fire_cooldown: u32,
    pub damage: f32,
    pub shot_speed: f32,
    pub burst: Option<BurstProfile>,
    pub mines: Option<MineProfile>,
    pub flanks: bool,
    pub is_static: bool,
}

impl AiProfile {
    pub fn for_kind(kind: EntityKind) -> Option<AiProfile> {
        let base = AiProfile {
            speed: 0.0,
            aggro_radius: 0.0,
            deaggro_radius: 0.0,
            weapon_range: 0.0,
            fire_cooldown: 0,
            damage: 0.0,
            shot_speed: 8.0,
            burst: None,
            mines: None,
            flanks: false,
            is_static: false,
        };
        let profile = match kind {
            EntityKind::Drone => AiProfile {
                speed: 3.5,
                aggro_radius: 450.0,
                deaggro_radius: 600.0,
                weapon_range: 320.0,
                fire_cooldown: 45,
                damage: 6.0,
                ..base
            },
            EntityKind::Guard => AiProfile {
                speed: 3.0,
                aggro_radius: 400.0,
                deaggro_radius: 550.0,
                weapon_range: 350.0,
                fire_cooldown: 75,
                damage: 5.0,
                shot_speed: 9.0,
                burst: Some(BurstProfile {
                    count: 3,
                    interval: 5,
                    recovery: 75,
                }),
                flanks: true,
                ..base
            },
            EntityKind::Tank => AiProfile {
                speed: 1.8,
                aggro_radius: 500.0,
                deaggro_radius: 700.0,
                weapon_range: 420.0,
                fire_cooldown: 60,
                damage: 12.0,
                shot_speed: 7.0,
                mines: Some(MineProfile {
                    interval_ticks: 180,
                    damage: 30.0,
                }),
                ..base
            },
            EntityKind::Tower => AiProfile {
                aggro_radius: 550.0,
                deaggro_radius: 650.0,
                weapon_range: 550.0,
                fire_cooldown: 40,
                damage: 8.0,
                shot_speed: 9.0,
                is_static: true,
                ..base
            },
            EntityKind::Boss => AiProfile {
                aggro_radius: 800.0,
                deaggro_radius: 900.0,
                weapon_range: 700.0,
                fire_cooldown: 30,
                damage: 15.0,
                is_static: true,
                ..base
            },
            EntityKind::BossFinal => AiProfile {
                aggro_radius: 900.0,
                deaggro_radius: 1000.0,
                weapon_range: 800.0,
                fire_cooldown: 20,
                damage: 18.0,
                shot_speed: 9.0,
                is_static: true,
                ..base
            },
            _ => return None,
        };
        Some(profile)
    }
}

/// Randomized per-instance parameters, fixed at registration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AiParams {
    pub orbit_radius: f32,
    pub speed_factor: f32,
    /// +1 clockwise, -1 counter-clockwise
    pub orbit_direction: f32,
    pub fire_jitter: u32,
}

impl AiParams {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self {
            orbit_radius: rng.gen_range(120.0..260.0),
            speed_factor: rng.gen_range(0.85..1.15),
            orbit_direction: if rng.gen_bool(0.5) { 1.0 } else { -1.0 },
            fire_jitter: rng.gen_range(0..10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiState {
    pub mode: AiMode,
    pub target: Option<EntityId>,
    pub fire_cooldown: u32,
    pub burst_remaining: u32,
    pub next_mine_tick: u64,
    /// Patrol center, also the guarded point for flankers
    pub home: Vec2,
    pub orbit_angle: f32,
    pub params: AiParams,
}

impl AiState {
    pub fn new(home: Vec2, params: AiParams, orbit_angle: f32) -> Self {
        Self {
            mode: AiMode::Patrol,
            target: None,
            fire_cooldown: params.fire_jitter,
            burst_remaining: 0,
            next_mine_tick: 0,
            home,
            orbit_angle,
            params,
        }
    }
}

/// What one entity wants to do this tick
#[derive(Debug)]
struct Decision {
    id: EntityId,
    state: AiState,
    velocity: Option<Vec2>,
    facing: Option<f32>,
    shots: SmallVec<[(f32, ShotSpec); 2]>,
}

/// Behavior state machines for every AI-controlled entity in one match
pub struct AiManager {
    states: FxMap<EntityId, AiState>,
    aggro_scale: f32,
}

impl AiManager {
    pub fn new() -> Self {
        Self {
            states: FxMap::default(),
            aggro_scale: 1.0,
        }
    }

    /// Start driving `entity_id`. Kinds without a profile are ignored.
    pub fn register(&mut self, sim: &mut Simulation, entity_id: EntityId, home: Vec2) -> bool {
        let Some(kind) = sim.entity(entity_id).map(|e| e.kind) else {
            return false;
        };
        if AiProfile::for_kind(kind).is_none() {
            return false;
        }
        let params = AiParams::random(sim.rng());
        let orbit_angle = sim.rng().gen_range(0.0..TAU);
        self.states
            .insert(entity_id, AiState::new(home, params, orbit_angle));
        true
    }

    pub fn unregister(&mut self, entity_id: EntityId) {
        self.states.remove(&entity_id);
    }

    pub fn get(&self, entity_id: EntityId) -> Option<&AiState> {
        self.states.get(&entity_id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Multiplier on every aggro/deaggro radius
    pub fn set_aggro_scale(&mut self, scale: f32) {
        self.aggro_scale = scale.max(0.1);
    }

    pub fn aggro_scale(&self) -> f32 {
        self.aggro_scale
    }

    /// Update all AI decisions
    /// Decisions are computed in parallel against a read-only view of the
    /// table, then applied sequentially in entity id order.
    pub fn update(&mut self, sim: &mut Simulation) {
        self.states.retain(|id, _| sim.contains(*id));

        let mut snapshot: Vec<(EntityId, AiState)> = self
            .states
            .iter()
            .map(|(&id, state)| (id, state.clone()))
            .collect();
        snapshot.sort_unstable_by_key(|(id, _)| *id);

        let view: &Simulation = sim;
        let tick = view.tick();
        let scale = self.aggro_scale;
        let decisions: Vec<Decision> = snapshot
            .into_par_iter()
            .filter_map(|(id, state)| decide(id, state, view, tick, scale))
            .collect();

        for decision in decisions {
            let (origin, radius, team) = match sim.entity_mut(decision.id) {
                Some(entity) => {
                    if let Some(velocity) = decision.velocity {
                        entity.velocity = velocity;
                    }
                    if let (Some(facing), EntityData::Armored { facing: current }) =
                        (decision.facing, &mut entity.data)
                    {
                        *current = facing;
                    }
                    (entity.position, entity.radius, entity.team)
                }
                None => continue,
            };

            for (angle, spec) in decision.shots {
                weapons::fire(sim, decision.id, team, origin, radius, angle, spec);
            }
            self.states.insert(decision.id, decision.state);
        }
    }
}

impl Default for AiManager {
    fn default() -> Self {
        Self::new()
    }
}

fn decide(
    id: EntityId,
    mut ai: AiState,
    sim: &Simulation,
    tick: u64,
    aggro_scale: f32,
) -> Option<Decision> {
    let entity = sim.entity(id)?;
    let profile = AiProfile::for_kind(entity.kind)?;

    let target = sim.nearest_opponent(entity.position, entity.team);
    ai.target = target.map(|t| t.id);
    let distance = target.map_or(f32::INFINITY, |t| entity.position.distance_to(t.position));

    ai.mode = next_mode(ai.mode, &ai, &profile, entity.position, distance, aggro_scale);

    let velocity = if profile.is_static {
        None
    } else {
        let desired = desired_velocity(&mut ai, &profile, entity.position, target.map(|t| t.position));
        Some(entity.velocity + (desired - entity.velocity) * STEERING)
    };

    let aim = target.map(|t| (t.position - entity.position).angle());
    let facing = entity.facing().map(|current| {
        let toward = aim.unwrap_or_else(|| {
            if entity.velocity.length_sq() > 0.0 {
                entity.velocity.angle()
            } else {
                current
            }
        });
        let delta = Vec2::from_angle(current)
            .angle_to(Vec2::from_angle(toward))
            .clamp(-TURN_RATE, TURN_RATE);
        current + delta
    });

    let mut shots: SmallVec<[(f32, ShotSpec); 2]> = SmallVec::new();
    ai.fire_cooldown = ai.fire_cooldown.saturating_sub(1);

    let engaged = matches!(ai.mode, AiMode::OrbitFire | AiMode::Flank);
    if let Some(aim) = aim.filter(|_| engaged && distance <= profile.weapon_range) {
        if ai.fire_cooldown == 0 {
            shots.push((aim, ShotSpec::enemy_bullet(profile.damage, profile.shot_speed)));
            ai.fire_cooldown = match profile.burst {
                Some(burst) => {
                    if ai.burst_remaining == 0 {
                        ai.burst_remaining = burst.count;
                    }
                    ai.burst_remaining -= 1;
                    if ai.burst_remaining > 0 {
                        burst.interval
                    } else {
                        burst.recovery + ai.params.fire_jitter
                    }
                }
                None => profile.fire_cooldown + ai.params.fire_jitter,
            };
        }
    } else if profile.burst.is_some() {
        ai.burst_remaining = 0;
    }

    if let Some(mines) = profile.mines {
        let hunting = matches!(ai.mode, AiMode::Chase | AiMode::OrbitFire);
        if hunting && tick >= ai.next_mine_tick {
            shots.push((0.0, ShotSpec::mine(mines.damage)));
            ai.next_mine_tick = tick + mines.interval_ticks;
        }
    }

    Some(Decision {
        id,
        state: ai,
        velocity,
        facing,
        shots,
    })
}

/// Mode transition with hysteresis: engage inside aggro, disengage beyond deaggro
fn next_mode(
    mode: AiMode,
    ai: &AiState,
    profile: &AiProfile,
    position: Vec2,
    distance: f32,
    aggro_scale: f32,
) -> AiMode {
    let aggro = profile.aggro_radius * aggro_scale;
    let deaggro = profile.deaggro_radius * aggro_scale;
    let orbit_enter = profile.weapon_range * ORBIT_ENTER_FRACTION;

    if profile.is_static {
        return match mode {
            AiMode::OrbitFire if distance > deaggro => AiMode::Patrol,
            AiMode::OrbitFire => AiMode::OrbitFire,
            _ if distance <= aggro => AiMode::OrbitFire,
            _ => AiMode::Patrol,
        };
    }

    let engage = || {
        if profile.flanks {
            AiMode::Flank
        } else if distance <= orbit_enter {
            AiMode::OrbitFire
        } else {
            AiMode::Chase
        }
    };

    match mode {
        AiMode::Patrol if distance <= aggro => engage(),
        AiMode::Patrol => AiMode::Patrol,
        AiMode::ReturnToBase if distance <= aggro => engage(),
        AiMode::ReturnToBase => {
            let ring_error = (position.distance_to(ai.home) - ai.params.orbit_radius).abs();
            if ring_error <= HOME_TOLERANCE {
                AiMode::Patrol
            } else {
                AiMode::ReturnToBase
            }
        }
        _ if distance > deaggro => AiMode::ReturnToBase,
        AiMode::Chase if distance <= orbit_enter => AiMode::OrbitFire,
        AiMode::OrbitFire if distance > profile.weapon_range => AiMode::Chase,
        other => other,
    }
}

fn desired_velocity(
    ai: &mut AiState,
    profile: &AiProfile,
    position: Vec2,
    target: Option<Vec2>,
) -> Vec2 {
    let speed = profile.speed * ai.params.speed_factor;
    let toward = |point: Vec2, speed: f32| (point - position).clamp_length(speed);

    match (ai.mode, target) {
        (AiMode::Chase, Some(target)) => (target - position).normalize() * speed,
        (AiMode::OrbitFire, Some(target)) => {
            let offset = position - target;
            let distance = offset.length();
            let standoff = profile.weapon_range * STANDOFF_FRACTION;
            let radial = offset.normalize() * ((standoff - distance) / standoff).clamp(-1.0, 1.0);
            let tangent = offset.normalize().perpendicular() * ai.params.orbit_direction;
            (radial + tangent).normalize() * speed
        }
        (AiMode::Flank, Some(target)) => {
            let away = (ai.home - target).normalize();
            toward(ai.home + away * FLANK_DISTANCE, speed)
        }
        (AiMode::ReturnToBase, _) => {
            let from_home = (position - ai.home).normalize();
            let from_home = if from_home == Vec2::ZERO {
                Vec2::from_angle(ai.orbit_angle)
            } else {
                from_home
            };
            toward(ai.home + from_home * ai.params.orbit_radius, speed)
        }
        _ => {
            let patrol_speed = speed * PATROL_SPEED_FACTOR;
            ai.orbit_angle = (ai.orbit_angle
                + ai.params.orbit_direction * patrol_speed / ai.params.orbit_radius)
                .rem_euclid(TAU);
            let waypoint = ai.home + Vec2::from_angle(ai.orbit_angle) * ai.params.orbit_radius;
            toward(waypoint, patrol_speed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Team;
    use uuid::Uuid;

    fn setup(kind: EntityKind, position: Vec2) -> (Simulation, AiManager, EntityId) {
        let mut sim = Simulation::new(21);
        let mut ai = AiManager::new();
        let id = sim.spawn(kind, Team::Adversary, position);
        assert!(ai.register(&mut sim, id, position));
        (sim, ai, id)
    }

    fn place_player(sim: &mut Simulation, position: Vec2) -> EntityId {
        let player_id = Uuid::new_v4();
        let craft = sim.add_player(player_id);
        sim.entity_mut(craft).unwrap().position = position;
        craft
    }

    #[test]
    fn test_register_ignores_unprofiled_kinds() {
        let mut sim = Simulation::new(1);
        let mut ai = AiManager::new();
        let pickup = sim.spawn(EntityKind::Energy, Team::Neutral, Vec2::ZERO);
        assert!(!ai.register(&mut sim, pickup, Vec2::ZERO));
        assert!(!ai.register(&mut sim, 999, Vec2::ZERO));
        assert!(ai.is_empty());
    }

    #[test]
    fn test_patrol_without_target() {
        let (mut sim, mut ai, id) = setup(EntityKind::Drone, Vec2::new(1000.0, 1000.0));
        ai.update(&mut sim);
        assert_eq!(ai.get(id).unwrap().mode, AiMode::Patrol);
        assert!(sim.entity(id).unwrap().velocity.length() > 0.0);
    }

    #[test]
    fn test_hysteresis_on_engage_and_disengage() {
        let home = Vec2::new(1000.0, 1000.0);
        let (mut sim, mut ai, id) = setup(EntityKind::Drone, home);
        let craft = place_player(&mut sim, home + Vec2::new(500.0, 0.0));

        // between aggro (450) and deaggro (600): not engaged yet
        ai.update(&mut sim);
        assert_eq!(ai.get(id).unwrap().mode, AiMode::Patrol);

        sim.entity_mut(craft).unwrap().position = sim.entity(id).unwrap().position + Vec2::new(440.0, 0.0);
        ai.update(&mut sim);
        assert_eq!(ai.get(id).unwrap().mode, AiMode::Chase);

        // back out to 500: still chasing
        sim.entity_mut(craft).unwrap().position = sim.entity(id).unwrap().position + Vec2::new(500.0, 0.0);
        ai.update(&mut sim);
        assert_eq!(ai.get(id).unwrap().mode, AiMode::Chase);

        sim.entity_mut(craft).unwrap().position = sim.entity(id).unwrap().position + Vec2::new(650.0, 0.0);
        ai.update(&mut sim);
        assert_eq!(ai.get(id).unwrap().mode, AiMode::ReturnToBase);
    }

    #[test]
    fn test_orbit_fire_shoots_on_cooldown() {
        let home = Vec2::new(1000.0, 1000.0);
        let (mut sim, mut ai, id) = setup(EntityKind::Drone, home);
        place_player(&mut sim, home + Vec2::new(200.0, 0.0));

        for _ in 0..60 {
            ai.update(&mut sim);
        }
        assert_eq!(ai.get(id).unwrap().mode, AiMode::OrbitFire);
        let shots: Vec<_> = sim
            .entities_of_kind(EntityKind::Bullet)
            .filter(|b| b.projectile().map(|p| p.owner) == Some(id))
            .collect();
        assert!(!shots.is_empty());
        assert!(shots.iter().all(|b| b.team == Team::Adversary));
    }

    #[test]
    fn test_tower_never_moves() {
        let home = Vec2::new(1200.0, 800.0);
        let (mut sim, mut ai, id) = setup(EntityKind::Tower, home);
        place_player(&mut sim, home + Vec2::new(300.0, 0.0));

        for _ in 0..30 {
            ai.update(&mut sim);
            sim.update();
        }
        assert_eq!(ai.get(id).unwrap().mode, AiMode::OrbitFire);
        assert_eq!(sim.entity(id).unwrap().position, home);
        assert_eq!(sim.entity(id).unwrap().velocity, Vec2::ZERO);
    }

    #[test]
    fn test_guard_fires_in_bursts() {
        let home = Vec2::new(1000.0, 1000.0);
        let (mut sim, mut ai, id) = setup(EntityKind::Guard, home);
        place_player(&mut sim, home + Vec2::new(250.0, 0.0));
        sim.entity_mut(id).unwrap().velocity = Vec2::ZERO;
        ai.states.get_mut(&id).unwrap().fire_cooldown = 0;

        let mut fired_ticks = Vec::new();
        for tick in 0..20 {
            let before = sim.count_kind(EntityKind::Bullet);
            ai.update(&mut sim);
            if sim.count_kind(EntityKind::Bullet) > before {
                fired_ticks.push(tick);
            }
        }

        assert_eq!(ai.get(id).unwrap().mode, AiMode::Flank);
        assert_eq!(fired_ticks.len(), 3);
        assert_eq!(fired_ticks[1] - fired_ticks[0], 5);
        assert_eq!(fired_ticks[2] - fired_ticks[1], 5);
    }

    #[test]
    fn test_tank_lays_mines_and_turns() {
        let home = Vec2::new(1000.0, 1000.0);
        let (mut sim, mut ai, id) = setup(EntityKind::Tank, home);
        place_player(&mut sim, home + Vec2::new(0.0, 300.0));

        ai.update(&mut sim);
        assert_eq!(sim.count_kind(EntityKind::Mine), 1);
        assert_eq!(ai.get(id).unwrap().next_mine_tick, 180);
        let facing = sim.entity(id).unwrap().facing().unwrap();
        assert!((facing - TURN_RATE).abs() < 1e-4);

        ai.update(&mut sim);
        assert_eq!(sim.count_kind(EntityKind::Mine), 1);
    }

    #[test]
    fn test_vanished_entities_discarded() {
        let (mut sim, mut ai, id) = setup(EntityKind::Drone, Vec2::new(500.0, 500.0));
        sim.remove_entity(id);
        ai.update(&mut sim);
        assert!(ai.get(id).is_none());
        assert!(ai.is_empty());
    }

    #[test]
    fn test_aggro_scale_widens_engagement() {
        let home = Vec2::new(1000.0, 1000.0);
        let (mut sim, mut ai, id) = setup(EntityKind::Drone, home);
        place_player(&mut sim, home + Vec2::new(520.0, 0.0));
        ai.set_aggro_scale(1.25);

        ai.update(&mut sim);
        assert_eq!(ai.get(id).unwrap().mode, AiMode::Chase);
    }
}
