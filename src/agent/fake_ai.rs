//! Scripted adversary director
//!
//! Plays the adversary side when no agent is attached. It decides on a fixed
//! interval and issues the same commands an agent would, through the same
//! gateway, so it is subject to the same funds, caps and budget.

use rand::Rng;
use tracing::debug;

use crate::agent::api::{AgentApi, Applied, CommandContext};
use crate::agent::command::{AgentCommand, CommandError, Strategy};
use crate::game::constants::agent::FALLBACK_DECISION_TICKS;
use crate::game::economy::UnitKind;

pub struct FakeAi {
    interval: u64,
    next_decision_tick: u64,
    issued: u64,
}

impl FakeAi {
    pub fn new() -> Self {
        Self::with_interval(FALLBACK_DECISION_TICKS)
    }

    pub fn with_interval(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            next_decision_tick: interval.max(1),
            issued: 0,
        }
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Make at most one decision if the interval has elapsed
    pub fn update(
        &mut self,
        api: &mut AgentApi,
        ctx: &mut CommandContext<'_>,
        boss_phase: u8,
    ) -> Option<Result<Applied, CommandError>> {
        let tick = ctx.sim.tick();
        if tick < self.next_decision_tick {
            return None;
        }
        self.next_decision_tick = tick + self.interval;

        let command = self.choose(api, ctx, boss_phase)?;
        let result = api.execute(command, ctx);
        if result.is_ok() {
            self.issued += 1;
        }
        debug!(tick, command = command.name(), ok = result.is_ok(), "scripted decision");
        Some(result)
    }

    fn choose(
        &self,
        api: &AgentApi,
        ctx: &mut CommandContext<'_>,
        boss_phase: u8,
    ) -> Option<AgentCommand> {
        // Boss exposed: throw everything at the players
        if boss_phase >= 3 && api.strategy() != Strategy::Aggressive {
            return Some(AgentCommand::SetStrategy {
                strategy: Strategy::Aggressive,
            });
        }

        let balance = ctx.economy.balance();
        let candidates: Vec<(UnitKind, u32)> = api
            .strategy()
            .build_weights()
            .into_iter()
            .filter(|&(kind, weight)| {
                weight > 0
                    && kind.cost() <= balance
                    && ctx.sim.count_kind(kind.entity_kind()) + ctx.economy.queued_count(kind)
                        < kind.cap()
            })
            .collect();

        let total: u32 = candidates.iter().map(|(_, w)| w).sum();
        if total == 0 {
            return None;
        }

        let mut roll = ctx.sim.rng().gen_range(0..total);
        let kind = candidates.iter().find_map(|&(kind, weight)| {
            if roll < weight {
                Some(kind)
            } else {
                roll -= weight;
                None
            }
        })?;

        Some(match kind {
            UnitKind::Tower => AgentCommand::BuildTower { at: None },
            unit => AgentCommand::SpawnUnit { unit, at: None },
        })
    }
}

impl Default for FakeAi {
    fn default() -> Self {
        Self::new()
    }
}
