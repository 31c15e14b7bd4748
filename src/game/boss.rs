//! Boss encounter director
//!
//! Four phases, never regressing and advancing at most one step per update:
//!
//! 1. Boss shielded while any tower stands.
//! 2. Boss shielded while any drone flies.
//! 3. Boss vulnerable. At zero HP it is removed and a death sequence starts;
//!    when the sequence ends the final form spawns.
//! 4. Final form teleports every time another 20% of its HP is gone. Killing
//!    it ends the match in the players' favor.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::game::constants::{boss::*, physics};
use crate::game::simulation::Simulation;
use crate::game::state::{EntityData, EntityId, EntityKind, Team};
use crate::game::systems::ai::AiManager;
use crate::util::vec2::Vec2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossPhaseState {
    /// 1..=4
    pub phase: u8,
    pub match_over: bool,
    pub winner: Option<Team>,
    /// Ticks left before the final form arrives
    pub death_countdown: Option<u32>,
}

impl Default for BossPhaseState {
    fn default() -> Self {
        Self {
            phase: 1,
            match_over: false,
            winner: None,
            death_countdown: None,
        }
    }
}

/// Phase block attached to snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseInfo {
    pub phase: u8,
    pub shielded: bool,
    pub match_over: bool,
    pub winner: Option<Team>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_countdown: Option<u32>,
    pub boss_id: Option<EntityId>,
    pub boss_hp: Option<f32>,
    pub boss_max_hp: Option<f32>,
    pub teleports: u32,
}

pub struct BossManager {
    state: BossPhaseState,
    boss_id: Option<EntityId>,
    shielded: bool,
    /// Teleport thresholds already used by the final form
    thresholds_consumed: u32,
}

impl BossManager {
    pub fn new() -> Self {
        Self {
            state: BossPhaseState::default(),
            boss_id: None,
            shielded: false,
            thresholds_consumed: 0,
        }
    }

    /// Place the first-form boss and hand it to the AI
    pub fn spawn_boss(&mut self, sim: &mut Simulation, ai: &mut AiManager) -> EntityId {
        let position = Vec2::new(SPAWN_X, SPAWN_Y);
        let id = sim.spawn(EntityKind::Boss, Team::Adversary, position);
        ai.register(sim, id, position);
        self.boss_id = Some(id);
        self.refresh_shield(sim);
        id
    }

    pub fn state(&self) -> &BossPhaseState {
        &self.state
    }

    pub fn phase(&self) -> u8 {
        self.state.phase
    }

    pub fn is_shielded(&self) -> bool {
        self.shielded
    }

    pub fn is_match_over(&self) -> bool {
        self.state.match_over
    }

    pub fn winner(&self) -> Option<Team> {
        self.state.winner
    }

    pub fn boss_id(&self) -> Option<EntityId> {
        self.boss_id
    }

    pub fn teleport_count(&self) -> u32 {
        self.thresholds_consumed
    }

    /// Current boss position, if a boss is in the table
    pub fn boss_position(&self, sim: &Simulation) -> Option<Vec2> {
        self.boss_id.and_then(|id| sim.entity(id)).map(|e| e.position)
    }

    pub fn phase_info(&self, sim: &Simulation) -> PhaseInfo {
        let boss = self.boss_id.and_then(|id| sim.entity(id));
        PhaseInfo {
            phase: self.state.phase,
            shielded: self.shielded,
            match_over: self.state.match_over,
            winner: self.state.winner,
            death_countdown: self.state.death_countdown,
            boss_id: boss.map(|b| b.id),
            boss_hp: boss.map(|b| b.hp),
            boss_max_hp: boss.map(|b| b.max_hp),
            teleports: self.thresholds_consumed,
        }
    }

    pub fn update(&mut self, sim: &mut Simulation, ai: &mut AiManager) {
        if self.state.match_over {
            return;
        }

        if self.shielded {
            if let Some(boss) = self.boss_id.and_then(|id| sim.entity_mut(id)) {
                if boss.hp < boss.max_hp {
                    boss.hp = boss.max_hp;
                }
            }
        }

        self.advance_phase(sim, ai);

        if self.state.phase == 4 {
            self.teleport_on_thresholds(sim);
        }

        self.check_win(sim);
        self.refresh_shield(sim);
    }

    /// Take at most one phase step
    fn advance_phase(&mut self, sim: &mut Simulation, ai: &mut AiManager) {
        match self.state.phase {
            1 if sim.count_kind(EntityKind::Tower) == 0 => self.enter_phase(2),
            2 if sim.count_kind(EntityKind::Drone) == 0 => self.enter_phase(3),
            3 => match self.state.death_countdown {
                None => {
                    let dead = self
                        .boss_id
                        .and_then(|id| sim.entity(id))
                        .is_some_and(|boss| boss.hp <= 0.0);
                    if dead {
                        if let Some(id) = self.boss_id.take() {
                            sim.remove_entity(id);
                            ai.unregister(id);
                        }
                        self.state.death_countdown = Some(DEATH_SEQUENCE_TICKS);
                        info!(tick = sim.tick(), "boss destroyed, death sequence started");
                    }
                }
                Some(remaining) if remaining > 1 => {
                    self.state.death_countdown = Some(remaining - 1);
                }
                Some(_) => {
                    self.state.death_countdown = None;
                    self.spawn_final_form(sim, ai);
                    self.enter_phase(4);
                }
            },
            _ => {}
        }
    }

    fn enter_phase(&mut self, phase: u8) {
        debug_assert_eq!(phase, self.state.phase + 1);
        info!(from = self.state.phase, to = phase, "boss phase advanced");
        self.state.phase = phase;
    }

    fn spawn_final_form(&mut self, sim: &mut Simulation, ai: &mut AiManager) {
        let position = Vec2::new(SPAWN_X, SPAWN_Y);
        let id = sim.spawn(EntityKind::BossFinal, Team::Adversary, position);
        ai.register(sim, id, position);
        self.boss_id = Some(id);
        self.thresholds_consumed = 0;
    }

    /// One teleport per 20% threshold crossed, each threshold used once
    fn teleport_on_thresholds(&mut self, sim: &mut Simulation) {
        let Some(id) = self.boss_id else {
            return;
        };
        let Some((hp, max_hp)) = sim.entity(id).map(|b| (b.hp, b.max_hp)) else {
            return;
        };
        if max_hp <= 0.0 {
            return;
        }

        // threshold k sits at (1 - k * step) of max HP
        let crossed = (1..=TELEPORT_THRESHOLDS)
            .take_while(|k| hp <= max_hp * (1.0 - *k as f32 * TELEPORT_STEP))
            .count() as u32;

        while self.thresholds_consumed < crossed {
            let destination = Vec2::new(
                sim.rng()
                    .gen_range(TELEPORT_MARGIN..physics::WORLD_WIDTH - TELEPORT_MARGIN),
                sim.rng()
                    .gen_range(TELEPORT_MARGIN..physics::WORLD_HEIGHT - TELEPORT_MARGIN),
            );
            if let Some(boss) = sim.entity_mut(id) {
                boss.position = destination;
                boss.velocity = Vec2::ZERO;
            }
            self.thresholds_consumed += 1;
            info!(
                threshold = self.thresholds_consumed,
                x = destination.x,
                y = destination.y,
                "final form teleported"
            );
        }
    }

    fn check_win(&mut self, sim: &mut Simulation) {
        if self.state.phase != 4 {
            return;
        }
        let Some(id) = self.boss_id else {
            return;
        };
        if sim.entity(id).is_some_and(|boss| boss.hp <= 0.0) {
            sim.remove_entity(id);
            self.boss_id = None;
            self.state.match_over = true;
            self.state.winner = Some(Team::Players);
            info!(tick = sim.tick(), "final form destroyed, match over");
        }
    }

    /// Shield state for the coming tick, mirrored onto the boss entity
    fn refresh_shield(&mut self, sim: &mut Simulation) {
        self.shielded = match self.state.phase {
            1 => sim.count_kind(EntityKind::Tower) > 0,
            2 => sim.count_kind(EntityKind::Drone) > 0,
            _ => false,
        } && self.boss_id.is_some();

        let shielded = self.shielded;
        if let Some(boss) = self.boss_id.and_then(|id| sim.entity_mut(id)) {
            boss.data = EntityData::Boss { shielded };
        }
    }
}

impl Default for BossManager {
    fn default() -> Self {
        Self::new()
    }
}
