//! Entity and per-player state.
//!
//! Every live object in a match is an [`Entity`] owned by the simulation's
//! entity table. Fields every subsystem reads (position, velocity, hp, team)
//! sit on the entity itself; kind-specific data lives in [`EntityData`].

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::game::constants::{boss, pickups, player, progression, weapons};
use crate::net::protocol::PlayerInput;
use crate::util::vec2::Vec2;

/// Unique player identifier (stable across reconnects)
pub type PlayerId = Uuid;

/// Entity identifier, unique within one simulation
pub type EntityId = u64;

/// Side an entity fights for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Players,
    Adversary,
    Neutral,
}

impl Team {
    /// Whether entities of these teams damage each other
    pub fn opposes(self, other: Team) -> bool {
        matches!(
            (self, other),
            (Team::Players, Team::Adversary) | (Team::Adversary, Team::Players)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Bullet,
    Missile,
    Mine,
    /// Basic adversary craft
    Drone,
    /// Flanking escort that fires in bursts
    Guard,
    /// Heavy craft with frontal armor
    Tank,
    /// Static defense
    Tower,
    Boss,
    /// Late-game boss form
    BossFinal,
    Energy,
}

impl EntityKind {
    pub fn is_projectile(self) -> bool {
        matches!(self, EntityKind::Bullet | EntityKind::Missile | EntityKind::Mine)
    }

    pub fn is_pickup(self) -> bool {
        matches!(self, EntityKind::Energy)
    }

    pub fn is_boss(self) -> bool {
        matches!(self, EntityKind::Boss | EntityKind::BossFinal)
    }

    /// Adversary craft that collide bodily with player craft
    pub fn is_adversary_craft(self) -> bool {
        matches!(self, EntityKind::Drone | EntityKind::Guard | EntityKind::Tank)
    }

    /// Something a weapon can target: not a projectile and not a pickup
    pub fn is_combatant(self) -> bool {
        !self.is_projectile() && !self.is_pickup()
    }

    pub fn base_hp(self) -> f32 {
        match self {
            EntityKind::Player => player::BASE_HP,
            EntityKind::Drone => 30.0,
            EntityKind::Guard => 60.0,
            EntityKind::Tank => 150.0,
            EntityKind::Tower => 200.0,
            EntityKind::Boss => boss::HP,
            EntityKind::BossFinal => boss::FINAL_HP,
            EntityKind::Bullet | EntityKind::Missile | EntityKind::Mine | EntityKind::Energy => 1.0,
        }
    }

    pub fn radius(self) -> f32 {
        match self {
            EntityKind::Player => player::RADIUS,
            EntityKind::Bullet => weapons::BULLET_RADIUS,
            EntityKind::Missile => weapons::MISSILE_RADIUS,
            EntityKind::Mine => weapons::MINE_RADIUS,
            EntityKind::Drone => 14.0,
            EntityKind::Guard => 16.0,
            EntityKind::Tank => 24.0,
            EntityKind::Tower => 22.0,
            EntityKind::Boss => boss::RADIUS,
            EntityKind::BossFinal => boss::FINAL_RADIUS,
            EntityKind::Energy => pickups::RADIUS,
        }
    }

    /// XP awarded to the player whose projectile lands the killing hit
    pub fn kill_xp(self) -> u32 {
        match self {
            EntityKind::Drone => 20,
            EntityKind::Guard => 35,
            EntityKind::Tank => 60,
            EntityKind::Tower => 50,
            EntityKind::Boss => 500,
            EntityKind::BossFinal => 1000,
            _ => 0,
        }
    }
}

/// Projectile payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectileData {
    /// Entity that fired it
    pub owner: EntityId,
    pub origin: Vec2,
    pub damage: f32,
    /// Remaining lifetime in ticks
    pub ttl: u32,
}

/// Kind-specific entity payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum EntityData {
    /// No extra state (drones, guards, towers)
    Plain,
    /// Player craft, linked back to its session
    Player { player_id: PlayerId },
    Projectile(ProjectileData),
    /// Directional armor; `facing` in radians
    Armored { facing: f32 },
    Boss { shielded: bool },
    Pickup { ttl: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub team: Team,
    pub position: Vec2,
    pub velocity: Vec2,
    pub hp: f32,
    pub max_hp: f32,
    pub radius: f32,
    pub data: EntityData,
}

impl Entity {
    /// New entity with the kind's baseline HP and radius
    pub fn new(id: EntityId, kind: EntityKind, team: Team, position: Vec2) -> Self {
        let hp = kind.base_hp();
        let data = match kind {
            EntityKind::Tank => EntityData::Armored { facing: 0.0 },
            EntityKind::Boss | EntityKind::BossFinal => EntityData::Boss { shielded: false },
            EntityKind::Energy => EntityData::Pickup { ttl: pickups::LIFETIME },
            _ => EntityData::Plain,
        };
        Self {
            id,
            kind,
            team,
            position,
            velocity: Vec2::ZERO,
            hp,
            max_hp: hp,
            radius: kind.radius(),
            data,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0.0
    }

    pub fn overlaps(&self, other: &Entity) -> bool {
        let reach = self.radius + other.radius;
        self.position.distance_sq_to(other.position) <= reach * reach
    }

    pub fn projectile(&self) -> Option<&ProjectileData> {
        match &self.data {
            EntityData::Projectile(p) => Some(p),
            _ => None,
        }
    }

    pub fn facing(&self) -> Option<f32> {
        match self.data {
            EntityData::Armored { facing } => Some(facing),
            _ => None,
        }
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        match self.data {
            EntityData::Player { player_id } => Some(player_id),
            _ => None,
        }
    }

    /// Subtract damage, clamping HP at zero
    pub fn apply_damage(&mut self, amount: f32) {
        self.hp = (self.hp - amount).max(0.0);
    }
}

/// Stats a player can spend upgrade points on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStat {
    Damage,
    Speed,
    FireRate,
    MaxHp,
}

impl FromStr for UpgradeStat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "damage" => Ok(UpgradeStat::Damage),
            "speed" => Ok(UpgradeStat::Speed),
            "fire_rate" => Ok(UpgradeStat::FireRate),
            "max_hp" | "health" => Ok(UpgradeStat::MaxHp),
            _ => Err(()),
        }
    }
}

/// Upgrade levels per stat, each capped at `MAX_UPGRADE_LEVEL`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upgrades {
    pub damage: u8,
    pub speed: u8,
    pub fire_rate: u8,
    pub max_hp: u8,
}

impl Upgrades {
    pub fn level(&self, stat: UpgradeStat) -> u8 {
        match stat {
            UpgradeStat::Damage => self.damage,
            UpgradeStat::Speed => self.speed,
            UpgradeStat::FireRate => self.fire_rate,
            UpgradeStat::MaxHp => self.max_hp,
        }
    }

    fn level_mut(&mut self, stat: UpgradeStat) -> &mut u8 {
        match stat {
            UpgradeStat::Damage => &mut self.damage,
            UpgradeStat::Speed => &mut self.speed,
            UpgradeStat::FireRate => &mut self.fire_rate,
            UpgradeStat::MaxHp => &mut self.max_hp,
        }
    }
}

/// Ticks remaining before each ability can fire again
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityCooldowns {
    pub bullet: u32,
    pub missile: u32,
    pub mine: u32,
}

impl AbilityCooldowns {
    pub fn tick(&mut self) {
        self.bullet = self.bullet.saturating_sub(1);
        self.missile = self.missile.saturating_sub(1);
        self.mine = self.mine.saturating_sub(1);
    }
}

/// Simulation-side record of a connected player
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub player_id: PlayerId,
    /// Craft currently in the table; `None` while disconnected
    pub entity_id: Option<EntityId>,
    pub input: PlayerInput,
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

impl PlayerSession {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            entity_id: None,
            input: PlayerInput::default(),
            level: 1,
            xp: 0,
            xp_to_next: xp_to_next(1),
            upgrades: Upgrades::default(),
            cannons: 1,
            pending_points: 0,
            cooldowns: AbilityCooldowns::default(),
            kills: 0,
            deaths: 0,
        }
    }

    /// Back to baseline progression. Identity and tallies survive.
    pub fn reset_progression(&mut self) {
        self.level = 1;
        self.xp = 0;
        self.xp_to_next = xp_to_next(1);
        self.upgrades = Upgrades::default();
        self.cannons = 1;
        self.pending_points = 0;
        self.cooldowns = AbilityCooldowns::default();
    }

    /// Add XP and process any level-ups. Returns the number of levels gained.
    pub fn grant_xp(&mut self, amount: u32) -> u32 {
        self.xp += amount;
        let mut gained = 0;
        while self.xp >= self.xp_to_next {
            self.xp -= self.xp_to_next;
            self.level += 1;
            gained += 1;
            if progression::MILESTONE_LEVELS.contains(&self.level)
                && self.cannons < progression::MAX_CANNONS
            {
                self.cannons += 1;
            } else {
                self.pending_points += 1;
            }
            self.xp_to_next = xp_to_next(self.level);
        }
        gained
    }

    /// Spend a pending point on `stat`. False if no point is pending or the stat is capped.
    pub fn apply_upgrade(&mut self, stat: UpgradeStat) -> bool {
        if self.pending_points == 0 {
            return false;
        }
        let level = self.upgrades.level_mut(stat);
        if *level >= progression::MAX_UPGRADE_LEVEL {
            return false;
        }
        *level += 1;
        self.pending_points -= 1;
        true
    }

    pub fn max_hp(&self) -> f32 {
        player::BASE_HP + self.upgrades.max_hp as f32 * progression::HP_PER_LEVEL
    }

    pub fn max_speed(&self) -> f32 {
        player::BASE_MAX_SPEED + self.upgrades.speed as f32 * progression::SPEED_PER_LEVEL
    }

    pub fn damage_multiplier(&self) -> f32 {
        1.0 + self.upgrades.damage as f32 * progression::DAMAGE_PER_LEVEL
    }

    pub fn bullet_cooldown(&self) -> u32 {
        weapons::BULLET_COOLDOWN
            .saturating_sub(self.upgrades.fire_rate as u32 * progression::FIRE_RATE_TICKS_PER_LEVEL)
            .max(2)
    }
}

/// XP needed to advance from `level` to the next
pub fn xp_to_next(level: u32) -> u32 {
    progression::BASE_XP_TO_LEVEL + level.saturating_sub(1) * progression::XP_STEP_PER_LEVEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_opposition() {
        assert!(Team::Players.opposes(Team::Adversary));
        assert!(Team::Adversary.opposes(Team::Players));
        assert!(!Team::Players.opposes(Team::Players));
        assert!(!Team::Neutral.opposes(Team::Players));
        assert!(!Team::Adversary.opposes(Team::Neutral));
    }

    #[test]
    fn test_entity_new_uses_kind_baseline() {
        let tank = Entity::new(7, EntityKind::Tank, Team::Adversary, Vec2::new(10.0, 20.0));
        assert_eq!(tank.hp, 150.0);
        assert_eq!(tank.max_hp, 150.0);
        assert_eq!(tank.facing(), Some(0.0));

        let boss = Entity::new(8, EntityKind::Boss, Team::Adversary, Vec2::ZERO);
        assert!(matches!(boss.data, EntityData::Boss { shielded: false }));
    }

    #[test]
    fn test_damage_clamps_to_zero() {
        let mut drone = Entity::new(1, EntityKind::Drone, Team::Adversary, Vec2::ZERO);
        drone.apply_damage(1000.0);
        assert_eq!(drone.hp, 0.0);
        assert!(!drone.is_alive());
    }

    #[test]
    fn test_overlap_is_circle_circle() {
        let a = Entity::new(1, EntityKind::Drone, Team::Adversary, Vec2::new(0.0, 0.0));
        let mut b = Entity::new(2, EntityKind::Player, Team::Players, Vec2::new(32.0, 0.0));
        assert!(a.overlaps(&b));
        b.position = Vec2::new(33.0, 0.0);
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn test_level_up_grants_point() {
        let mut session = PlayerSession::new(Uuid::new_v4());
        let gained = session.grant_xp(100);
        assert_eq!(gained, 1);
        assert_eq!(session.level, 2);
        assert_eq!(session.xp, 0);
        assert_eq!(session.pending_points, 1);
        assert_eq!(session.xp_to_next, 150);
    }

    #[test]
    fn test_milestone_level_grants_cannon() {
        let mut session = PlayerSession::new(Uuid::new_v4());
        // Levels 2,3,4 cost 100+150+200, level 5 costs 250
        session.grant_xp(100 + 150 + 200 + 250);
        assert_eq!(session.level, 5);
        assert_eq!(session.cannons, 2);
        assert_eq!(session.pending_points, 3);
    }

    #[test]
    fn test_upgrade_requires_point_and_respects_cap() {
        let mut session = PlayerSession::new(Uuid::new_v4());
        assert!(!session.apply_upgrade(UpgradeStat::Damage));

        session.pending_points = 10;
        for _ in 0..progression::MAX_UPGRADE_LEVEL {
            assert!(session.apply_upgrade(UpgradeStat::Damage));
        }
        assert!(!session.apply_upgrade(UpgradeStat::Damage));
        assert_eq!(session.upgrades.damage, progression::MAX_UPGRADE_LEVEL);
        assert_eq!(session.pending_points, 10 - progression::MAX_UPGRADE_LEVEL as u32);
    }

    #[test]
    fn test_reset_progression_keeps_identity() {
        let id = Uuid::new_v4();
        let mut session = PlayerSession::new(id);
        session.grant_xp(1000);
        session.kills = 3;
        session.reset_progression();

        assert_eq!(session.player_id, id);
        assert_eq!(session.level, 1);
        assert_eq!(session.cannons, 1);
        assert_eq!(session.kills, 3);
    }

    #[test]
    fn test_upgrade_stat_parse() {
        assert_eq!("fire_rate".parse::<UpgradeStat>(), Ok(UpgradeStat::FireRate));
        assert_eq!("health".parse::<UpgradeStat>(), Ok(UpgradeStat::MaxHp));
        assert!("armor".parse::<UpgradeStat>().is_err());
    }
}
