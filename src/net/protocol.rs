//! Wire messages for player sessions.
//!
//! Every frame is a JSON object carrying a protocol version `v` and a `type`
//! tag, e.g. `{"v":1,"type":"join_room","room_id":"alpha","name":"ace"}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::boss::PhaseInfo;
use crate::game::constants::agent::PROTOCOL_VERSION;
use crate::game::simulation::WorldSnapshot;
use crate::game::state::{EntityId, PlayerId, Team, UpgradeStat};
use crate::lobby::room::{ControlMode, RoomState};
use crate::util::vec2::Vec2;

/// Stable error codes surfaced to clients and agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidCommand,
    InsufficientFunds,
    CapReached,
    TooFar,
    RateLimited,
    InvalidUnit,
    RoomNotFound,
    RoomNotInProgress,
    AgentModeDisabled,
    MatchOver,
    RoomFull,
    RoomFinished,
    RegistryFull,
    InvalidReconnectToken,
    NotInRoom,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidCommand => "invalid_command",
            ErrorCode::InsufficientFunds => "insufficient_funds",
            ErrorCode::CapReached => "cap_reached",
            ErrorCode::TooFar => "too_far",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::InvalidUnit => "invalid_unit",
            ErrorCode::RoomNotFound => "room_not_found",
            ErrorCode::RoomNotInProgress => "room_not_in_progress",
            ErrorCode::AgentModeDisabled => "agent_mode_disabled",
            ErrorCode::MatchOver => "match_over",
            ErrorCode::RoomFull => "room_full",
            ErrorCode::RoomFinished => "room_finished",
            ErrorCode::RegistryFull => "registry_full",
            ErrorCode::InvalidReconnectToken => "invalid_reconnect_token",
            ErrorCode::NotInRoom => "not_in_room",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to decode an inbound frame
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidCommand
    }
}

/// Per-tick control state sent by a player
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerInput {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub fire: bool,
    pub missile: bool,
    pub mine: bool,
    /// Aim angle in radians (0 = +x, y grows downward)
    pub aim: f32,
}

impl PlayerInput {
    /// Unit-length movement direction from the held flags, or zero when idle
    pub fn direction(&self) -> Vec2 {
        let x = (self.right as i32 - self.left as i32) as f32;
        let y = (self.down as i32 - self.up as i32) as f32;
        Vec2::new(x, y).normalize()
    }

    /// Replace a non-finite aim with zero
    pub fn sanitized(mut self) -> Self {
        if !self.aim.is_finite() {
            self.aim = 0.0;
        }
        self
    }
}

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinRoom {
        room_id: String,
        name: String,
        #[serde(default)]
        reconnect_token: Option<String>,
    },
    PlayerInput(PlayerInput),
    StartGame {
        #[serde(default)]
        control_mode: Option<ControlMode>,
    },
    LeaveRoom,
    ApplyUpgrade {
        stat: String,
    },
}

#[derive(Debug, Deserialize)]
struct ClientEnvelope {
    v: u32,
    #[serde(flatten)]
    message: ClientMessage,
}

/// Decode one inbound text frame, checking the envelope version
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let envelope: ClientEnvelope = serde_json::from_str(text)?;
    if envelope.v != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(envelope.v));
    }
    Ok(envelope.message)
}

/// Lobby roster entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyPlayerInfo {
    pub player_id: PlayerId,
    pub name: String,
    pub index: usize,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyState {
    pub room_id: String,
    pub state: RoomState,
    pub control_mode: ControlMode,
    pub players: Vec<LobbyPlayerInfo>,
}

/// Broadcast state of one match at one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub world: WorldSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PhaseInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adversary_resources: Option<f32>,
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        player_id: PlayerId,
        entity_id: Option<EntityId>,
        player_index: usize,
        reconnect_token: String,
        lobby: LobbyState,
    },
    RoomError {
        code: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Snapshot(Snapshot),
    LobbyUpdate(LobbyState),
    MatchStart {
        tick: u64,
        control_mode: ControlMode,
    },
    MatchEnd {
        tick: u64,
        winner: Option<Team>,
    },
    UpgradeResult {
        stat: UpgradeStat,
        applied: bool,
        pending_points: u32,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, detail: Option<String>) -> Self {
        ServerMessage::RoomError { code, detail }
    }

    /// Encode with the protocol envelope
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct Outbound<'a> {
            v: u32,
            #[serde(flatten)]
            message: &'a ServerMessage,
        }

        serde_json::to_string(&Outbound {
            v: PROTOCOL_VERSION,
            message: self,
        })
    }
}
