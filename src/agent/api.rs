//! Command gateway: budget enforcement and dispatch into the economy.

use tracing::{debug, info};

use crate::agent::command::{parse_command, AgentCommand, CommandError, CommandOutcome, Strategy};
use crate::game::constants::agent::{AGENT_BUDGET_MAX, AGENT_BUDGET_WINDOW_TICKS};
use crate::game::economy::{Economy, UnitKind};
use crate::game::simulation::Simulation;
use crate::game::systems::ai::AiManager;
use crate::util::vec2::Vec2;

/// Mutable view of the room state a command can touch
pub struct CommandContext<'a> {
    pub sim: &'a mut Simulation,
    pub economy: &'a mut Economy,
    pub ai: &'a mut AiManager,
    /// Point builds are placed around (the boss, or the world center)
    pub anchor: Vec2,
}

/// Result of an accepted command
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Applied {
    pub tick: u64,
    pub cost: f32,
    pub balance: f32,
    pub budget_remaining: u32,
}

/// Fixed-window command budget
///
/// At most `max` successful commands per `window_ticks` window; the whole
/// budget comes back when the window elapses.
#[derive(Debug, Clone)]
pub struct CommandBudget {
    max: u32,
    window_ticks: u64,
    remaining: u32,
    window_start: u64,
}

impl CommandBudget {
    pub fn new(max: u32, window_ticks: u64) -> Self {
        Self {
            max,
            window_ticks,
            remaining: max,
            window_start: 0,
        }
    }

    pub fn refresh(&mut self, tick: u64) {
        if tick >= self.window_start + self.window_ticks {
            self.remaining = self.max;
            self.window_start = tick;
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn reset_in(&self, tick: u64) -> u64 {
        (self.window_start + self.window_ticks).saturating_sub(tick)
    }

    fn consume(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }
}

pub struct AgentApi {
    budget: CommandBudget,
    strategy: Strategy,
    accepted: u64,
    rejected: u64,
}

impl AgentApi {
    pub fn new() -> Self {
        Self::with_budget(AGENT_BUDGET_MAX, AGENT_BUDGET_WINDOW_TICKS)
    }

    pub fn with_budget(max: u32, window_ticks: u64) -> Self {
        Self {
            budget: CommandBudget::new(max, window_ticks),
            strategy: Strategy::default(),
            accepted: 0,
            rejected: 0,
        }
    }

    /// Per-tick budget refresh
    pub fn update(&mut self, tick: u64) {
        self.budget.refresh(tick);
    }

    pub fn budget_remaining(&self) -> u32 {
        self.budget.remaining()
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Run a validated command. The budget is checked first and only spent on success.
    pub fn execute(
        &mut self,
        command: AgentCommand,
        ctx: &mut CommandContext<'_>,
    ) -> Result<Applied, CommandError> {
        let tick = ctx.sim.tick();
        if self.budget.remaining() == 0 {
            self.rejected += 1;
            return Err(CommandError::RateLimited {
                reset_in_ticks: self.budget.reset_in(tick),
            });
        }

        let result = match command {
            AgentCommand::SpawnUnit { unit, at } => ctx
                .economy
                .request_build(ctx.sim, unit, at, ctx.anchor)
                .map(|build| build.kind.cost()),
            AgentCommand::BuildTower { at } => ctx
                .economy
                .request_build(ctx.sim, UnitKind::Tower, at, ctx.anchor)
                .map(|build| build.kind.cost()),
            AgentCommand::SetStrategy { strategy } => {
                self.strategy = strategy;
                ctx.ai.set_aggro_scale(strategy.aggro_scale());
                info!(strategy = strategy.as_str(), "strategy changed");
                Ok(0.0)
            }
        };

        match result {
            Ok(cost) => {
                self.budget.consume();
                self.accepted += 1;
                Ok(Applied {
                    tick,
                    cost,
                    balance: ctx.economy.balance(),
                    budget_remaining: self.budget.remaining(),
                })
            }
            Err(e) => {
                self.rejected += 1;
                debug!(command = command.name(), error = %e, "command rejected");
                Err(e.into())
            }
        }
    }

    /// Validate and run a raw payload, always producing a response
    pub fn handle(
        &mut self,
        payload: serde_json::Value,
        ctx: &mut CommandContext<'_>,
    ) -> CommandOutcome {
        let command = match parse_command(payload) {
            Ok(command) => command,
            Err(e) => {
                self.rejected += 1;
                debug!(error = %e, "malformed agent command");
                return self.outcome(None, Err(e), ctx);
            }
        };
        let name = Some(command.name().to_string());
        let result = self.execute(command, ctx);
        self.outcome(name, result, ctx)
    }

    /// Reject a payload before it reaches validation (room gating)
    pub fn refuse(&mut self, error: CommandError, ctx: &CommandContext<'_>) -> CommandOutcome {
        self.rejected += 1;
        debug!(error = %error, "agent command refused");
        self.outcome(None, Err(error), ctx)
    }

    /// Build the wire response for a command result
    pub fn outcome(
        &self,
        command: Option<String>,
        result: Result<Applied, CommandError>,
        ctx: &CommandContext<'_>,
    ) -> CommandOutcome {
        match result {
            Ok(applied) => CommandOutcome {
                ok: true,
                tick: applied.tick,
                command,
                cost: Some(applied.cost),
                balance: applied.balance,
                budget_remaining: applied.budget_remaining,
                error: None,
                detail: None,
            },
            Err(e) => CommandOutcome {
                ok: false,
                tick: ctx.sim.tick(),
                command,
                cost: None,
                balance: ctx.economy.balance(),
                budget_remaining: self.budget.remaining(),
                error: Some(e.code()),
                detail: Some(e.to_string()),
            },
        }
    }
}

impl Default for AgentApi {
    fn default() -> Self {
        Self::new()
    }
}
