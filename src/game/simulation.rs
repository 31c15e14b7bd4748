//! Authoritative entity table and the per-tick update pipeline.
//!
//! `Simulation` owns every entity and player session in one match. Other
//! subsystems (AI, boss director, economy) hold entity ids only and take
//! `&mut Simulation` explicitly when they need to read or write the table.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::game::constants::{physics, player};
use crate::game::state::{
    AbilityCooldowns, Entity, EntityData, EntityId, EntityKind, PlayerId, PlayerSession, Team,
    UpgradeStat, Upgrades,
};
use crate::game::systems::{collision, physics as motion, pickups, weapons};
use crate::net::protocol::PlayerInput;
use crate::util::vec2::Vec2;
use crate::util::FxMap;

/// Per-player progression as broadcast to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProgress {
    pub player_id: PlayerId,
    pub entity_id: Option<EntityId>,
    pub level: u32,
    pub xp: u32,
    pub xp_to_next: u32,
    pub upgrades: Upgrades,
    pub cannons: u32,
    pub pending_points: u32,
    pub cooldowns: AbilityCooldowns,
    pub kills: u32,
    pub deaths: u32,
}

impl From<&PlayerSession> for PlayerProgress {
    fn from(session: &PlayerSession) -> Self {
        Self {
            player_id: session.player_id,
            entity_id: session.entity_id,
            level: session.level,
            xp: session.xp,
            xp_to_next: session.xp_to_next,
            upgrades: session.upgrades,
            cannons: session.cannons,
            pending_points: session.pending_points,
            cooldowns: session.cooldowns,
            kills: session.kills,
            deaths: session.deaths,
        }
    }
}

/// Immutable copy of the table at one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    /// Sorted by entity id
    pub entities: Vec<Entity>,
    pub players: Vec<PlayerProgress>,
}

pub struct Simulation {
    tick: u64,
    pub(crate) entities: FxMap<EntityId, Entity>,
    pub(crate) sessions: FxMap<PlayerId, PlayerSession>,
    next_entity_id: EntityId,
    pub(crate) pickup_timer: u32,
    /// Resources collected by adversary craft, drained by the economy
    pub(crate) adversary_income: f32,
    pub(crate) rng: StdRng,
}

impl Simulation {
    pub fn new(seed: u64) -> Self {
        Self {
            tick: 0,
            entities: FxMap::default(),
            sessions: FxMap::default(),
            next_entity_id: 1,
            pickup_timer: 0,
            adversary_income: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Advance one tick
    pub fn update(&mut self) {
        self.tick += 1;

        // (a) input and motion
        motion::apply_player_input(self);
        motion::integrate_craft(self);

        // (b) weapons
        weapons::fire_player_weapons(self);

        // (c) projectiles and hazards
        motion::integrate_projectiles(self);

        // (d)+(e) damage and kill credit
        collision::resolve(self);

        // (f)
        self.remove_dead();

        // (g)
        pickups::update(self);

        motion::sanitize(self);
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    // ----- table access -----

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities_of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(move |e| e.kind == kind)
    }

    pub fn entities_of_team(&self, team: Team) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(move |e| e.team == team)
    }

    pub fn count_kind(&self, kind: EntityKind) -> usize {
        self.entities_of_kind(kind).count()
    }

    /// All entity ids in ascending order
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Nearest alive, non-projectile entity opposing `team`, by squared distance
    pub fn nearest_opponent(&self, from: Vec2, team: Team) -> Option<&Entity> {
        let mut best: Option<(&Entity, f32)> = None;
        for entity in self.entities.values() {
            if !entity.kind.is_combatant() || !entity.is_alive() || !team.opposes(entity.team) {
                continue;
            }
            let dist_sq = from.distance_sq_to(entity.position);
            if best.map_or(true, |(_, d)| dist_sq < d) {
                best = Some((entity, dist_sq));
            }
        }
        best.map(|(e, _)| e)
    }

    pub fn spawn(&mut self, kind: EntityKind, team: Team, position: Vec2) -> EntityId {
        let id = self.alloc_id();
        self.entities.insert(id, Entity::new(id, kind, team, position));
        id
    }

    /// Insert a fully built entity under a fresh id
    pub fn spawn_entity(&mut self, mut entity: Entity) -> EntityId {
        let id = self.alloc_id();
        entity.id = id;
        self.entities.insert(id, entity);
        id
    }

    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    fn alloc_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    // ----- players -----

    /// Create a session and spawn its craft. Re-adding an existing player respawns it.
    pub fn add_player(&mut self, player_id: PlayerId) -> EntityId {
        if let Some(id) = self.respawn_player(player_id) {
            return id;
        }
        let position = self.player_spawn_point();
        let id = self.alloc_id();
        let mut session = PlayerSession::new(player_id);
        session.entity_id = Some(id);
        self.entities
            .insert(id, player_craft(id, player_id, position, session.max_hp()));
        self.sessions.insert(player_id, session);
        id
    }

    /// Drop the session and its craft
    pub fn remove_player(&mut self, player_id: PlayerId) -> bool {
        match self.sessions.remove(&player_id) {
            Some(session) => {
                if let Some(id) = session.entity_id {
                    self.entities.remove(&id);
                }
                true
            }
            None => false,
        }
    }

    /// Remove the craft but keep the session (disconnect grace)
    pub fn despawn_player(&mut self, player_id: PlayerId) -> bool {
        let Some(session) = self.sessions.get_mut(&player_id) else {
            return false;
        };
        session.input = PlayerInput::default();
        if let Some(id) = session.entity_id.take() {
            self.entities.remove(&id);
        }
        true
    }

    /// Ensure the player's craft is in the table, spawning a fresh one if needed
    pub fn respawn_player(&mut self, player_id: PlayerId) -> Option<EntityId> {
        let existing = self.sessions.get(&player_id)?.entity_id;
        if let Some(id) = existing.filter(|id| self.entities.contains_key(id)) {
            return Some(id);
        }

        let position = self.player_spawn_point();
        let id = self.alloc_id();
        let session = self.sessions.get_mut(&player_id)?;
        session.entity_id = Some(id);
        self.entities
            .insert(id, player_craft(id, player_id, position, session.max_hp()));
        Some(id)
    }

    pub fn session(&self, player_id: PlayerId) -> Option<&PlayerSession> {
        self.sessions.get(&player_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    /// Session whose current craft is `entity_id`
    pub fn session_for_entity_mut(&mut self, entity_id: EntityId) -> Option<&mut PlayerSession> {
        self.sessions
            .values_mut()
            .find(|s| s.entity_id == Some(entity_id))
    }

    pub fn set_input(&mut self, player_id: PlayerId, input: PlayerInput) -> bool {
        match self.sessions.get_mut(&player_id) {
            Some(session) => {
                session.input = input.sanitized();
                true
            }
            None => false,
        }
    }

    /// Spend a pending point. Returns false when nothing was applied.
    pub fn apply_upgrade(&mut self, player_id: PlayerId, stat: UpgradeStat) -> bool {
        let Some(session) = self.sessions.get_mut(&player_id) else {
            return false;
        };
        if !session.apply_upgrade(stat) {
            return false;
        }
        if stat == UpgradeStat::MaxHp {
            let max_hp = session.max_hp();
            if let Some(craft) = session.entity_id.and_then(|id| self.entities.get_mut(&id)) {
                let gained = max_hp - craft.max_hp;
                craft.max_hp = max_hp;
                craft.hp = (craft.hp + gained).min(max_hp);
            }
        }
        true
    }

    /// Resources adversary craft picked up since the last call
    pub fn take_adversary_income(&mut self) -> f32 {
        std::mem::take(&mut self.adversary_income)
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        let mut entities: Vec<Entity> = self.entities.values().cloned().collect();
        entities.sort_unstable_by_key(|e| e.id);
        let mut players: Vec<PlayerProgress> =
            self.sessions.values().map(PlayerProgress::from).collect();
        players.sort_unstable_by_key(|p| p.player_id);
        WorldSnapshot {
            tick: self.tick,
            entities,
            players,
        }
    }

    fn player_spawn_point(&mut self) -> Vec2 {
        Vec2::new(
            self.rng.gen_range(player::SPAWN_X_MARGIN..physics::WORLD_WIDTH - player::SPAWN_X_MARGIN),
            self.rng.gen_range(player::SPAWN_Y_MIN..player::SPAWN_Y_MAX),
        )
    }

    /// Step (f): drop every HP-zero entity except boss kinds, respawning players
    fn remove_dead(&mut self) {
        let dead: Vec<(EntityId, EntityKind)> = self
            .entities
            .values()
            .filter(|e| e.kind.is_combatant() && !e.kind.is_boss() && e.hp <= 0.0)
            .map(|e| (e.id, e.kind))
            .collect();

        for (id, kind) in dead {
            if kind != EntityKind::Player {
                self.entities.remove(&id);
                continue;
            }

            let position = self.player_spawn_point();
            let Some(session) = self.session_for_entity_mut(id) else {
                self.entities.remove(&id);
                continue;
            };
            session.deaths += 1;
            session.reset_progression();
            let max_hp = session.max_hp();
            let player_id = session.player_id;
            debug!(%player_id, entity_id = id, "player craft destroyed, respawning");

            if let Some(craft) = self.entities.get_mut(&id) {
                craft.position = position;
                craft.velocity = Vec2::ZERO;
                craft.max_hp = max_hp;
                craft.hp = max_hp;
            }
        }
    }
}

fn player_craft(id: EntityId, player_id: PlayerId, position: Vec2, max_hp: f32) -> Entity {
    let mut craft = Entity::new(id, EntityKind::Player, Team::Players, position);
    craft.data = EntityData::Player { player_id };
    craft.max_hp = max_hp;
    craft.hp = max_hp;
    craft
}
