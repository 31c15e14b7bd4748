//! Agent command schema
//!
//! The wire envelope is `{"v":1,"command":"spawn_unit","params":{...}}`. The
//! command name selects one strongly typed parameter record; anything that does
//! not fit is rejected before a handler runs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::game::constants::agent::PROTOCOL_VERSION;
use crate::game::economy::{EconomyError, UnitKind};
use crate::net::protocol::ErrorCode;
use crate::util::vec2::Vec2;

/// Named adversary posture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Balanced,
    Aggressive,
    Defensive,
    Swarm,
}

impl Strategy {
    /// Multiplier applied to every AI aggro radius
    pub fn aggro_scale(self) -> f32 {
        match self {
            Strategy::Balanced => 1.0,
            Strategy::Aggressive => 1.3,
            Strategy::Defensive => 0.8,
            Strategy::Swarm => 1.1,
        }
    }

    /// Relative build preference of the scripted director
    pub fn build_weights(self) -> [(UnitKind, u32); 4] {
        match self {
            Strategy::Balanced => [
                (UnitKind::Drone, 4),
                (UnitKind::Guard, 2),
                (UnitKind::Tank, 2),
                (UnitKind::Tower, 2),
            ],
            Strategy::Aggressive => [
                (UnitKind::Drone, 3),
                (UnitKind::Guard, 3),
                (UnitKind::Tank, 4),
                (UnitKind::Tower, 0),
            ],
            Strategy::Defensive => [
                (UnitKind::Drone, 2),
                (UnitKind::Guard, 3),
                (UnitKind::Tank, 1),
                (UnitKind::Tower, 5),
            ],
            Strategy::Swarm => [
                (UnitKind::Drone, 8),
                (UnitKind::Guard, 1),
                (UnitKind::Tank, 0),
                (UnitKind::Tower, 1),
            ],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Balanced => "balanced",
            Strategy::Aggressive => "aggressive",
            Strategy::Defensive => "defensive",
            Strategy::Swarm => "swarm",
        }
    }
}

impl FromStr for Strategy {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balanced" => Ok(Strategy::Balanced),
            "aggressive" => Ok(Strategy::Aggressive),
            "defensive" => Ok(Strategy::Defensive),
            "swarm" => Ok(Strategy::Swarm),
            other => Err(CommandError::InvalidParams {
                command: "set_strategy",
                reason: format!("unknown strategy '{}'", other),
            }),
        }
    }
}

/// Validated command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgentCommand {
    /// Queue a mobile adversary craft
    SpawnUnit { unit: UnitKind, at: Option<Vec2> },
    BuildTower { at: Option<Vec2> },
    SetStrategy { strategy: Strategy },
}

impl AgentCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AgentCommand::SpawnUnit { .. } => "spawn_unit",
            AgentCommand::BuildTower { .. } => "build_tower",
            AgentCommand::SetStrategy { .. } => "set_strategy",
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{command}: {reason}")]
    InvalidParams {
        command: &'static str,
        reason: String,
    },
    #[error("'{0}' cannot be spawned")]
    InvalidUnit(String),
    #[error(transparent)]
    Economy(#[from] EconomyError),
    #[error("command budget exhausted, resets in {reset_in_ticks} ticks")]
    RateLimited { reset_in_ticks: u64 },
    #[error("room is in scripted mode")]
    AgentModeDisabled,
    #[error("match is over")]
    MatchOver,
    #[error("match has not started")]
    RoomNotInProgress,
    #[error("room not found")]
    RoomNotFound,
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::Malformed(_)
            | CommandError::UnsupportedVersion(_)
            | CommandError::UnknownCommand(_)
            | CommandError::InvalidParams { .. } => ErrorCode::InvalidCommand,
            CommandError::InvalidUnit(_) => ErrorCode::InvalidUnit,
            CommandError::Economy(e) => e.code(),
            CommandError::RateLimited { .. } => ErrorCode::RateLimited,
            CommandError::AgentModeDisabled => ErrorCode::AgentModeDisabled,
            CommandError::MatchOver => ErrorCode::MatchOver,
            CommandError::RoomNotInProgress => ErrorCode::RoomNotInProgress,
            CommandError::RoomNotFound => ErrorCode::RoomNotFound,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommandEnvelope {
    v: u32,
    command: String,
    #[serde(default)]
    params: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SpawnUnitParams {
    unit: String,
    #[serde(default)]
    x: Option<f32>,
    #[serde(default)]
    y: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildTowerParams {
    #[serde(default)]
    x: Option<f32>,
    #[serde(default)]
    y: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetStrategyParams {
    name: String,
}

fn params<T: DeserializeOwned>(
    command: &'static str,
    value: Option<serde_json::Value>,
) -> Result<T, CommandError> {
    let value = value.unwrap_or_else(|| serde_json::Value::Object(Default::default()));
    serde_json::from_value(value).map_err(|e| CommandError::InvalidParams {
        command,
        reason: e.to_string(),
    })
}

fn point(command: &'static str, x: Option<f32>, y: Option<f32>) -> Result<Option<Vec2>, CommandError> {
    match (x, y) {
        (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(Some(Vec2::new(x, y))),
        (None, None) => Ok(None),
        _ => Err(CommandError::InvalidParams {
            command,
            reason: "x and y must be given together".to_string(),
        }),
    }
}

/// Validate a raw payload into a command
pub fn parse_command(payload: serde_json::Value) -> Result<AgentCommand, CommandError> {
    let envelope: CommandEnvelope =
        serde_json::from_value(payload).map_err(|e| CommandError::Malformed(e.to_string()))?;
    if envelope.v != PROTOCOL_VERSION {
        return Err(CommandError::UnsupportedVersion(envelope.v));
    }

    match envelope.command.as_str() {
        "spawn_unit" => {
            let p: SpawnUnitParams = params("spawn_unit", envelope.params)?;
            let unit = p
                .unit
                .parse::<UnitKind>()
                .map_err(|_| CommandError::InvalidUnit(p.unit.clone()))?;
            if unit == UnitKind::Tower {
                return Err(CommandError::InvalidUnit(p.unit));
            }
            Ok(AgentCommand::SpawnUnit {
                unit,
                at: point("spawn_unit", p.x, p.y)?,
            })
        }
        "build_tower" => {
            let p: BuildTowerParams = params("build_tower", envelope.params)?;
            Ok(AgentCommand::BuildTower {
                at: point("build_tower", p.x, p.y)?,
            })
        }
        "set_strategy" => {
            let p: SetStrategyParams = params("set_strategy", envelope.params)?;
            Ok(AgentCommand::SetStrategy {
                strategy: p.name.parse()?,
            })
        }
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}

/// Parse a text frame as a command payload
pub fn parse_command_text(text: &str) -> Result<AgentCommand, CommandError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| CommandError::Malformed(e.to_string()))?;
    parse_command(value)
}

/// Response to one agent command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub ok: bool,
    pub tick: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f32>,
    pub balance: f32,
    pub budget_remaining: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CommandOutcome {
    /// Rejection that never reached a room
    pub fn rejected(error: &CommandError) -> Self {
        Self {
            ok: false,
            tick: 0,
            command: None,
            cost: None,
            balance: 0.0,
            budget_remaining: 0,
            error: Some(error.code()),
            detail: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_spawn_unit() {
        let cmd = parse_command(json!({"v": 1, "command": "spawn_unit", "params": {"unit": "tank"}}))
            .unwrap();
        assert_eq!(
            cmd,
            AgentCommand::SpawnUnit {
                unit: UnitKind::Tank,
                at: None
            }
        );
    }

    #[test]
    fn test_parse_build_tower_with_point() {
        let cmd = parse_command(json!({"v": 1, "command": "build_tower", "params": {"x": 10.0, "y": 20.0}}))
            .unwrap();
        assert_eq!(
            cmd,
            AgentCommand::BuildTower {
                at: Some(Vec2::new(10.0, 20.0))
            }
        );
        // params may be omitted entirely
        assert_eq!(
            parse_command(json!({"v": 1, "command": "build_tower"})).unwrap(),
            AgentCommand::BuildTower { at: None }
        );
    }

    #[test]
    fn test_parse_set_strategy() {
        let cmd = parse_command(json!({"v": 1, "command": "set_strategy", "params": {"name": "swarm"}}))
            .unwrap();
        assert_eq!(
            cmd,
            AgentCommand::SetStrategy {
                strategy: Strategy::Swarm
            }
        );

        let err = parse_command(json!({"v": 1, "command": "set_strategy", "params": {"name": "panic"}}))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCommand);
    }

    #[test]
    fn test_spawn_unit_rejects_bad_units() {
        let err = parse_command(json!({"v": 1, "command": "spawn_unit", "params": {"unit": "tower"}}))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidUnit);

        let err = parse_command(json!({"v": 1, "command": "spawn_unit", "params": {"unit": "mothership"}}))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidUnit);
    }

    #[test]
    fn test_schema_violations_are_invalid_command() {
        let cases = [
            json!({"v": 1, "command": "launch_nukes", "params": {}}),
            json!({"v": 2, "command": "build_tower", "params": {}}),
            json!({"command": "build_tower"}),
            json!({"v": 1, "command": "spawn_unit", "params": {}}),
            json!({"v": 1, "command": "spawn_unit", "params": {"unit": "drone", "x": 5.0}}),
            json!({"v": 1, "command": "build_tower", "params": {"x": 1.0, "y": 1.0, "z": 1.0}}),
            json!([1, 2, 3]),
        ];
        for case in cases {
            let err = parse_command(case.clone()).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidCommand, "case {}", case);
        }
    }

    #[test]
    fn test_outcome_omits_empty_fields() {
        let outcome = CommandOutcome {
            ok: true,
            tick: 12,
            command: Some("build_tower".into()),
            cost: Some(100.0),
            balance: 100.0,
            budget_remaining: 9,
            error: None,
            detail: None,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["budget_remaining"], 9);
        assert!(value.get("error").is_none());
    }
}
