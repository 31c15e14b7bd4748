//! Adversary resources and build queue.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use crate::game::constants::{economy::*, physics};
use crate::game::simulation::Simulation;
use crate::game::state::{EntityKind, Team};
use crate::game::systems::ai::AiManager;
use crate::net::protocol::ErrorCode;
use crate::util::vec2::Vec2;

/// Units the adversary can build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Drone,
    Guard,
    Tank,
    Tower,
}

impl UnitKind {
    pub const ALL: [UnitKind; 4] = [UnitKind::Drone, UnitKind::Guard, UnitKind::Tank, UnitKind::Tower];

    pub fn entity_kind(self) -> EntityKind {
        match self {
            UnitKind::Drone => EntityKind::Drone,
            UnitKind::Guard => EntityKind::Guard,
            UnitKind::Tank => EntityKind::Tank,
            UnitKind::Tower => EntityKind::Tower,
        }
    }

    pub fn cost(self) -> f32 {
        match self {
            UnitKind::Drone => 50.0,
            UnitKind::Guard => 80.0,
            UnitKind::Tank => 120.0,
            UnitKind::Tower => 100.0,
        }
    }

    /// Maximum live plus queued
    pub fn cap(self) -> usize {
        match self {
            UnitKind::Drone => 12,
            UnitKind::Guard => 4,
            UnitKind::Tank => 4,
            UnitKind::Tower => 6,
        }
    }

    /// Distance band around the anchor for default placement
    pub fn spawn_band(self) -> (f32, f32) {
        match self {
            UnitKind::Drone => (150.0, 350.0),
            UnitKind::Guard => (100.0, 220.0),
            UnitKind::Tank => (200.0, 400.0),
            UnitKind::Tower => (180.0, 450.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Drone => "drone",
            UnitKind::Guard => "guard",
            UnitKind::Tank => "tank",
            UnitKind::Tower => "tower",
        }
    }
}

impl FromStr for UnitKind {
    type Err = EconomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drone" => Ok(UnitKind::Drone),
            "guard" => Ok(UnitKind::Guard),
            "tank" => Ok(UnitKind::Tank),
            "tower" => Ok(UnitKind::Tower),
            other => Err(EconomyError::UnknownUnit(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EconomyError {
    #[error("unknown unit kind '{0}'")]
    UnknownUnit(String),
    #[error("insufficient funds: cost {cost}, balance {balance:.1}")]
    InsufficientFunds { cost: f32, balance: f32 },
    #[error("{kind:?} cap of {cap} reached")]
    CapReached { kind: UnitKind, cap: usize },
    #[error("target is {distance:.0} from the anchor, max {max:.0}")]
    TooFar { distance: f32, max: f32 },
}

impl EconomyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EconomyError::UnknownUnit(_) => ErrorCode::InvalidUnit,
            EconomyError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            EconomyError::CapReached { .. } => ErrorCode::CapReached,
            EconomyError::TooFar { .. } => ErrorCode::TooFar,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueuedBuild {
    pub kind: UnitKind,
    pub ready_tick: u64,
    pub position: Vec2,
}

pub struct Economy {
    balance: f32,
    queue: Vec<QueuedBuild>,
    total_spent: f32,
    total_built: u64,
}

impl Economy {
    pub fn new() -> Self {
        Self::with_balance(STARTING_BALANCE)
    }

    pub fn with_balance(balance: f32) -> Self {
        Self {
            balance,
            queue: Vec::new(),
            total_spent: 0.0,
            total_built: 0,
        }
    }

    pub fn balance(&self) -> f32 {
        self.balance
    }

    pub fn queue(&self) -> &[QueuedBuild] {
        &self.queue
    }

    pub fn queued_count(&self, kind: UnitKind) -> usize {
        self.queue.iter().filter(|b| b.kind == kind).count()
    }

    pub fn total_spent(&self) -> f32 {
        self.total_spent
    }

    pub fn total_built(&self) -> u64 {
        self.total_built
    }

    /// Validate, charge and enqueue one build
    ///
    /// Nothing changes unless every check passes. Without `target` the unit is
    /// placed at a random point in its band around `anchor`.
    pub fn request_build(
        &mut self,
        sim: &mut Simulation,
        kind: UnitKind,
        target: Option<Vec2>,
        anchor: Vec2,
    ) -> Result<QueuedBuild, EconomyError> {
        let cost = kind.cost();
        if self.balance < cost {
            return Err(EconomyError::InsufficientFunds {
                cost,
                balance: self.balance,
            });
        }

        let live = sim.count_kind(kind.entity_kind());
        if live + self.queued_count(kind) >= kind.cap() {
            return Err(EconomyError::CapReached {
                kind,
                cap: kind.cap(),
            });
        }

        let position = match target {
            Some(point) => point,
            None => default_placement(sim, kind, anchor),
        };
        if kind == UnitKind::Tower {
            let distance = position.distance_to(anchor);
            if distance > TOWER_MAX_SPAWN_DISTANCE {
                return Err(EconomyError::TooFar {
                    distance,
                    max: TOWER_MAX_SPAWN_DISTANCE,
                });
            }
        }

        let build = QueuedBuild {
            kind,
            ready_tick: sim.tick() + BUILD_COOLDOWN_TICKS,
            position: clamp_to_world(position),
        };
        self.balance -= cost;
        self.total_spent += cost;
        self.queue.push(build);
        debug!(kind = kind.as_str(), ready_tick = build.ready_tick, balance = self.balance, "build queued");
        Ok(build)
    }

    /// Accrue income and turn due builds into live units
    pub fn update(&mut self, sim: &mut Simulation, ai: &mut AiManager, anchor: Vec2) {
        self.balance += INCOME_PER_TICK + sim.take_adversary_income();

        let tick = sim.tick();
        let (due, pending): (Vec<QueuedBuild>, Vec<QueuedBuild>) =
            self.queue.drain(..).partition(|b| b.ready_tick <= tick);
        self.queue = pending;

        for build in due {
            let id = sim.spawn(build.kind.entity_kind(), Team::Adversary, build.position);
            let home = if build.kind == UnitKind::Tower {
                build.position
            } else {
                anchor
            };
            ai.register(sim, id, home);
            self.total_built += 1;
            info!(kind = build.kind.as_str(), entity_id = id, tick, "build resolved");
        }
    }
}

impl Default for Economy {
    fn default() -> Self {
        Self::new()
    }
}

fn default_placement(sim: &mut Simulation, kind: UnitKind, anchor: Vec2) -> Vec2 {
    let (min, max) = kind.spawn_band();
    let angle = sim.rng().gen_range(0.0..TAU);
    let distance = sim.rng().gen_range(min..max);
    anchor + Vec2::from_angle(angle) * distance
}

fn clamp_to_world(position: Vec2) -> Vec2 {
    position.clamp_to(
        Vec2::ZERO,
        Vec2::new(physics::WORLD_WIDTH, physics::WORLD_HEIGHT),
    )
}
