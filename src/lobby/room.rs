//! One match: the simulation stack plus the players bound to it.
//!
//! A room is `waiting` until its first join, which seeds the world and moves
//! it to `in_progress`. It becomes `finished` once the boss director reports
//! the match over and never leaves that state; the registry collects it after
//! a short linger so clients can read the final snapshot.

use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentApi, CommandContext, CommandError, CommandOutcome, FakeAi, Strategy};
use crate::game::boss::{BossManager, PhaseInfo};
use crate::game::constants::{physics, room as limits};
use crate::game::economy::{Economy, QueuedBuild, UnitKind};
use crate::game::performance::{PerformanceStatus, TickMetrics, TickMetricsSnapshot};
use crate::game::simulation::Simulation;
use crate::game::state::{EntityId, EntityKind, PlayerId, Team, UpgradeStat};
use crate::game::systems::ai::AiManager;
use crate::lobby::player::{PlayerTx, RoomPlayer};
use crate::net::protocol::{ErrorCode, LobbyState, PlayerInput, ServerMessage, Snapshot};
use crate::util::vec2::Vec2;
use crate::util::FxMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Waiting,
    InProgress,
    Finished,
}

impl RoomState {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomState::Waiting => "waiting",
            RoomState::InProgress => "in_progress",
            RoomState::Finished => "finished",
        }
    }
}

/// Who drives the adversary side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Built-in director
    #[default]
    Scripted,
    /// External agent through the command API
    Agent,
}

impl ControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlMode::Scripted => "scripted",
            ControlMode::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("room is full ({0} players)")]
    RoomFull(usize),
    #[error("match has finished")]
    RoomFinished,
    #[error("reconnect token not recognized")]
    InvalidReconnectToken,
    #[error("player is not in this room")]
    NotInRoom,
    #[error("unknown upgrade stat '{0}'")]
    UnknownStat(String),
}

impl RoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::RoomFull(_) => ErrorCode::RoomFull,
            RoomError::RoomFinished => ErrorCode::RoomFinished,
            RoomError::InvalidReconnectToken => ErrorCode::InvalidReconnectToken,
            RoomError::NotInRoom => ErrorCode::NotInRoom,
            RoomError::UnknownStat(_) => ErrorCode::InvalidCommand,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub max_players: usize,
    pub reconnect_grace: Duration,
    pub seed: u64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_players: limits::MAX_PLAYERS,
            reconnect_grace: Duration::from_secs(limits::RECONNECT_GRACE_SECS),
            seed: rand::random(),
        }
    }
}

/// Accepted join or reconnect
#[derive(Debug, Clone, PartialEq)]
pub struct Joined {
    pub player_id: PlayerId,
    pub entity_id: Option<EntityId>,
    pub index: usize,
    pub reconnect_token: String,
}

/// What one tick produced, for the caller's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub tick: u64,
    pub duration: Duration,
    pub finished: bool,
}

/// Live adversary units by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitCounts {
    pub drone: usize,
    pub guard: usize,
    pub tank: usize,
    pub tower: usize,
}

/// Row of the room listing
#[derive(Debug, Clone, Serialize)]
pub struct RoomListing {
    pub room_id: String,
    pub state: RoomState,
    pub control_mode: ControlMode,
    pub players: usize,
    pub phase: u8,
    pub tick: u64,
}

/// Detailed per-room view for the admin surface
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub state: RoomState,
    pub control_mode: ControlMode,
    pub tick: u64,
    pub players: usize,
    pub connected: usize,
    pub balance: f32,
    pub units: UnitCounts,
    pub build_queue: Vec<QueuedBuild>,
    pub strategy: Strategy,
    pub budget_remaining: u32,
    pub commands_accepted: u64,
    pub commands_rejected: u64,
    pub phase: PhaseInfo,
    pub tick_metrics: TickMetricsSnapshot,
}

pub struct Room {
    id: String,
    state: RoomState,
    control_mode: ControlMode,
    settings: RoomSettings,
    sim: Simulation,
    ai: AiManager,
    boss: BossManager,
    economy: Economy,
    agent_api: AgentApi,
    fake_ai: FakeAi,
    metrics: TickMetrics,
    players: FxMap<PlayerId, RoomPlayer>,
    created_at: Instant,
    empty_since: Option<Instant>,
    finished_at: Option<Instant>,
}

impl Room {
    pub fn new(id: impl Into<String>, settings: RoomSettings) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            state: RoomState::Waiting,
            control_mode: ControlMode::default(),
            sim: Simulation::new(settings.seed),
            settings,
            ai: AiManager::new(),
            boss: BossManager::new(),
            economy: Economy::new(),
            agent_api: AgentApi::new(),
            fake_ai: FakeAi::new(),
            metrics: TickMetrics::new(physics::TICK_RATE),
            players: FxMap::default(),
            created_at: now,
            empty_since: Some(now),
            finished_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn control_mode(&self) -> ControlMode {
        self.control_mode
    }

    pub fn tick(&self) -> u64 {
        self.sim.tick()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn connected_count(&self) -> usize {
        self.players.values().filter(|p| p.is_connected()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&RoomPlayer> {
        self.players.get(&player_id)
    }

    pub fn sim(&self) -> &Simulation {
        &self.sim
    }

    pub fn boss(&self) -> &BossManager {
        &self.boss
    }

    pub fn economy(&self) -> &Economy {
        &self.economy
    }

    pub fn agent_api(&self) -> &AgentApi {
        &self.agent_api
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// No players for longer than the reconnect grace
    pub fn is_abandoned(&self, now: Instant) -> bool {
        self.empty_since
            .is_some_and(|since| now.saturating_duration_since(since) > self.settings.reconnect_grace)
    }

    /// Abandoned, or finished for longer than the linger, whoever is still bound
    pub fn is_collectable(&self, now: Instant) -> bool {
        let linger = Duration::from_secs(limits::FINISHED_LINGER_SECS);
        self.is_abandoned(now)
            || self
                .finished_at
                .is_some_and(|at| now.saturating_duration_since(at) >= linger)
    }

    /// Builds are placed around the boss, or the world center without one
    fn anchor(&self) -> Vec2 {
        self.boss.boss_position(&self.sim).unwrap_or(Vec2::new(
            physics::WORLD_WIDTH / 2.0,
            physics::WORLD_HEIGHT / 2.0,
        ))
    }

    // ----- membership -----

    pub fn add_player(&mut self, name: &str, tx: Option<PlayerTx>) -> Result<Joined, RoomError> {
        if self.state == RoomState::Finished {
            return Err(RoomError::RoomFinished);
        }
        if self.players.len() >= self.settings.max_players {
            return Err(RoomError::RoomFull(self.settings.max_players));
        }
        if self.state == RoomState::Waiting {
            self.begin();
        }

        let player_id = Uuid::new_v4();
        let index = self.free_index();
        let entity_id = self.sim.add_player(player_id);
        let player = RoomPlayer::new(player_id, clean_name(name, index), index, tx);
        let joined = Joined {
            player_id,
            entity_id: Some(entity_id),
            index,
            reconnect_token: player.reconnect_token.as_str().to_string(),
        };

        info!(room_id = %self.id, %player_id, index, name = %player.name, "player joined");
        self.players.insert(player_id, player);
        self.empty_since = None;
        self.welcome(&joined);
        self.broadcast_lobby();
        Ok(joined)
    }

    /// Rebind a disconnected (or replaced) transport by token.
    /// A token that matches nobody leaves the room untouched.
    pub fn reconnect(&mut self, token: &str, tx: Option<PlayerTx>, now: Instant) -> Option<Joined> {
        if self.state == RoomState::Finished {
            return None;
        }
        let grace = self.settings.reconnect_grace;
        let player_id = self
            .players
            .values()
            .find(|p| p.reconnect_token.matches(token) && !p.grace_expired(now, grace))
            .map(|p| p.id)?;

        let entity_id = match self.sim.respawn_player(player_id) {
            Some(id) => id,
            None => self.sim.add_player(player_id),
        };
        let player = self.players.get_mut(&player_id)?;
        if player.is_connected() {
            debug!(room_id = %self.id, %player_id, "live transport replaced");
        }
        player.reconnect(tx);
        let joined = Joined {
            player_id,
            entity_id: Some(entity_id),
            index: player.index,
            reconnect_token: player.reconnect_token.as_str().to_string(),
        };

        info!(room_id = %self.id, %player_id, entity_id, "player reconnected");
        self.welcome(&joined);
        self.broadcast_lobby();
        Some(joined)
    }

    /// Keep the record for the grace window, but take the craft out of play
    pub fn disconnect(&mut self, player_id: PlayerId, now: Instant) -> bool {
        let Some(player) = self.players.get_mut(&player_id) else {
            return false;
        };
        player.disconnect(now);
        self.sim.despawn_player(player_id);
        info!(room_id = %self.id, %player_id, "player disconnected");
        self.broadcast_lobby();
        true
    }

    /// Disconnect only while `tx` is still the player's transport. The old
    /// socket of a player who reconnected elsewhere closes as a no-op.
    pub fn release(&mut self, player_id: PlayerId, tx: &PlayerTx, now: Instant) -> bool {
        if !self.owns_transport(player_id, tx) {
            debug!(room_id = %self.id, %player_id, "stale transport closed");
            return false;
        }
        self.disconnect(player_id, now)
    }

    pub fn owns_transport(&self, player_id: PlayerId, tx: &PlayerTx) -> bool {
        self.players
            .get(&player_id)
            .is_some_and(|p| p.is_bound_to(tx))
    }

    /// Cut off players whose queue stayed full; they may reconnect inside the grace window
    fn drop_lagging(&mut self, now: Instant) {
        let lagging: Vec<PlayerId> = self
            .players
            .values()
            .filter(|p| p.is_connected() && p.is_lagging())
            .map(|p| p.id)
            .collect();
        for player_id in lagging {
            warn!(room_id = %self.id, %player_id, "outbound queue stalled, dropping transport");
            self.disconnect(player_id, now);
        }
    }

    pub fn leave(&mut self, player_id: PlayerId) -> bool {
        if self.players.remove(&player_id).is_none() {
            return false;
        }
        self.sim.remove_player(player_id);
        info!(room_id = %self.id, %player_id, "player left");
        self.note_if_empty(Instant::now());
        self.broadcast_lobby();
        true
    }

    /// Purge records whose grace window ran out
    pub fn sweep_disconnected(&mut self, now: Instant) -> Vec<PlayerId> {
        let grace = self.settings.reconnect_grace;
        let expired: Vec<PlayerId> = self
            .players
            .values()
            .filter(|p| p.grace_expired(now, grace))
            .map(|p| p.id)
            .collect();

        for player_id in &expired {
            self.players.remove(player_id);
            self.sim.remove_player(*player_id);
            info!(room_id = %self.id, %player_id, "reconnect grace expired");
        }
        if !expired.is_empty() {
            self.note_if_empty(now);
            self.broadcast_lobby();
        }
        expired
    }

    /// Drop every transport; receivers see their channel close
    pub fn close(&mut self) {
        let count = self.players.len();
        self.players.clear();
        info!(room_id = %self.id, players = count, "room closed");
    }

    fn free_index(&self) -> usize {
        (0..)
            .find(|i| !self.players.values().any(|p| p.index == *i))
            .unwrap_or(self.players.len())
    }

    fn note_if_empty(&mut self, now: Instant) {
        if self.players.is_empty() && self.empty_since.is_none() {
            self.empty_since = Some(now);
        }
    }

    // ----- player messages -----

    pub fn handle_input(&mut self, player_id: PlayerId, input: PlayerInput) -> Result<(), RoomError> {
        if !self.players.get(&player_id).is_some_and(|p| p.is_connected()) {
            return Err(RoomError::NotInRoom);
        }
        self.sim.set_input(player_id, input);
        Ok(())
    }

    /// Spend a pending point; the player is told either way
    pub fn apply_upgrade(&mut self, player_id: PlayerId, stat: &str) -> Result<bool, RoomError> {
        if !self.players.contains_key(&player_id) {
            return Err(RoomError::NotInRoom);
        }
        let stat: UpgradeStat = stat
            .parse()
            .map_err(|_| RoomError::UnknownStat(stat.to_string()))?;

        let applied = self.sim.apply_upgrade(player_id, stat);
        let pending_points = self
            .sim
            .session(player_id)
            .map(|s| s.pending_points)
            .unwrap_or(0);
        debug!(room_id = %self.id, %player_id, ?stat, applied, "upgrade requested");

        if let Some(player) = self.players.get(&player_id) {
            player.send(ServerMessage::UpgradeResult {
                stat,
                applied,
                pending_points,
            });
        }
        Ok(applied)
    }

    /// Start (if still waiting) and optionally switch the control mode
    pub fn start_game(&mut self, mode: Option<ControlMode>) -> Result<(), RoomError> {
        if self.state == RoomState::Finished {
            return Err(RoomError::RoomFinished);
        }
        if self.state == RoomState::Waiting {
            self.begin();
        }
        if let Some(mode) = mode {
            if mode != self.control_mode {
                info!(room_id = %self.id, mode = mode.as_str(), "control mode changed");
            }
            self.control_mode = mode;
        }

        self.broadcast(&ServerMessage::MatchStart {
            tick: self.sim.tick(),
            control_mode: self.control_mode,
        });
        self.broadcast_lobby();
        Ok(())
    }

    // ----- agent -----

    /// Gate on room state and control mode, then hand the payload to the gateway
    pub fn agent_command(&mut self, payload: serde_json::Value) -> CommandOutcome {
        let gate = match self.state {
            RoomState::Waiting => Some(CommandError::RoomNotInProgress),
            RoomState::Finished => Some(CommandError::MatchOver),
            RoomState::InProgress if self.boss.is_match_over() => Some(CommandError::MatchOver),
            RoomState::InProgress if self.control_mode != ControlMode::Agent => {
                Some(CommandError::AgentModeDisabled)
            }
            RoomState::InProgress => None,
        };

        let anchor = self.anchor();
        let mut ctx = CommandContext {
            sim: &mut self.sim,
            economy: &mut self.economy,
            ai: &mut self.ai,
            anchor,
        };
        match gate {
            Some(error) => self.agent_api.refuse(error, &ctx),
            None => self.agent_api.handle(payload, &mut ctx),
        }
    }

    // ----- tick -----

    /// Advance one tick. Does nothing unless the match is in progress.
    pub fn step(&mut self) -> Option<TickOutcome> {
        if self.state != RoomState::InProgress {
            return None;
        }
        let started = Instant::now();

        self.sim.update();
        self.ai.update(&mut self.sim);
        let anchor = self.anchor();
        self.economy.update(&mut self.sim, &mut self.ai, anchor);
        self.agent_api.update(self.sim.tick());
        self.boss.update(&mut self.sim, &mut self.ai);

        if self.control_mode == ControlMode::Scripted && !self.boss.is_match_over() {
            let phase = self.boss.phase();
            let anchor = self.anchor();
            let mut ctx = CommandContext {
                sim: &mut self.sim,
                economy: &mut self.economy,
                ai: &mut self.ai,
                anchor,
            };
            self.fake_ai.update(&mut self.agent_api, &mut ctx, phase);
        }

        let tick = self.sim.tick();
        let finished = self.boss.is_match_over();
        if finished {
            self.finish();
        } else if tick % limits::SNAPSHOT_INTERVAL_TICKS == 0 {
            self.broadcast(&ServerMessage::Snapshot(self.snapshot()));
        }
        self.drop_lagging(started);

        let duration = started.elapsed();
        if let Some(report) = self.metrics.record(started, duration) {
            info!(
                room_id = %self.id,
                ticks = report.ticks,
                tick_rate = report.tick_rate,
                max_tick_ms = report.max_tick_ms,
                entities = self.sim.entity_count(),
                "tick window"
            );
            if self.metrics.status() != PerformanceStatus::Good {
                warn!(room_id = %self.id, usage = self.metrics.budget_usage_percent(), "tick budget pressure");
            }
        }

        Some(TickOutcome {
            tick,
            duration,
            finished,
        })
    }

    fn begin(&mut self) {
        let boss_id = self.boss.spawn_boss(&mut self.sim, &mut self.ai);
        let center = self.anchor();

        for i in 0..limits::STARTER_DRONES {
            let angle = TAU * i as f32 / limits::STARTER_DRONES as f32;
            let position = center + Vec2::from_angle(angle) * limits::STARTER_DRONE_DISTANCE;
            let id = self.sim.spawn(EntityKind::Drone, Team::Adversary, position);
            self.ai.register(&mut self.sim, id, center);
        }
        for i in 0..limits::STARTER_TOWERS {
            let angle = TAU * (i as f32 + 0.5) / limits::STARTER_TOWERS as f32;
            let position = center + Vec2::from_angle(angle) * limits::STARTER_TOWER_DISTANCE;
            let id = self.sim.spawn(EntityKind::Tower, Team::Adversary, position);
            self.ai.register(&mut self.sim, id, position);
        }

        self.state = RoomState::InProgress;
        info!(room_id = %self.id, boss_id, "match started");
    }

    fn finish(&mut self) {
        self.state = RoomState::Finished;
        self.finished_at = Some(Instant::now());
        let tick = self.sim.tick();
        let winner = self.boss.winner();
        info!(room_id = %self.id, tick, ?winner, "match finished");

        self.broadcast(&ServerMessage::Snapshot(self.snapshot()));
        self.broadcast(&ServerMessage::MatchEnd { tick, winner });
        self.broadcast_lobby();
    }

    // ----- outbound -----

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            world: self.sim.snapshot(),
            phase: Some(self.boss.phase_info(&self.sim)),
            adversary_resources: Some(self.economy.balance()),
        }
    }

    pub fn lobby_state(&self) -> LobbyState {
        let mut players: Vec<_> = self.players.values().map(RoomPlayer::info).collect();
        players.sort_by_key(|p| p.index);
        LobbyState {
            room_id: self.id.clone(),
            state: self.state,
            control_mode: self.control_mode,
            players,
        }
    }

    pub fn broadcast(&self, message: &ServerMessage) {
        for player in self.players.values().filter(|p| p.is_connected()) {
            player.send(message.clone());
        }
    }

    fn broadcast_lobby(&self) {
        self.broadcast(&ServerMessage::LobbyUpdate(self.lobby_state()));
    }

    fn welcome(&self, joined: &Joined) {
        if let Some(player) = self.players.get(&joined.player_id) {
            player.send(ServerMessage::Welcome {
                player_id: joined.player_id,
                entity_id: joined.entity_id,
                player_index: joined.index,
                reconnect_token: joined.reconnect_token.clone(),
                lobby: self.lobby_state(),
            });
        }
    }

    pub fn listing(&self) -> RoomListing {
        RoomListing {
            room_id: self.id.clone(),
            state: self.state,
            control_mode: self.control_mode,
            players: self.players.len(),
            phase: self.boss.phase(),
            tick: self.sim.tick(),
        }
    }

    pub fn summary(&self) -> RoomSummary {
        let live = |kind: UnitKind| self.sim.count_kind(kind.entity_kind());
        RoomSummary {
            room_id: self.id.clone(),
            state: self.state,
            control_mode: self.control_mode,
            tick: self.sim.tick(),
            players: self.players.len(),
            connected: self.connected_count(),
            balance: self.economy.balance(),
            units: UnitCounts {
                drone: live(UnitKind::Drone),
                guard: live(UnitKind::Guard),
                tank: live(UnitKind::Tank),
                tower: live(UnitKind::Tower),
            },
            build_queue: self.economy.queue().to_vec(),
            strategy: self.agent_api.strategy(),
            budget_remaining: self.agent_api.budget_remaining(),
            commands_accepted: self.agent_api.accepted(),
            commands_rejected: self.agent_api.rejected(),
            phase: self.boss.phase_info(&self.sim),
            tick_metrics: self.metrics.snapshot(),
        }
    }
}

#[cfg(test)]
impl Room {
    /// Zero every adversary combatant each tick until the match ends
    pub(crate) fn play_to_victory(&mut self) {
        for _ in 0..1_000 {
            let targets: Vec<EntityId> = self
                .sim
                .entities_of_team(Team::Adversary)
                .filter(|e| e.kind.is_combatant())
                .map(|e| e.id)
                .collect();
            for id in targets {
                if let Some(entity) = self.sim.entity_mut(id) {
                    entity.hp = 0.0;
                }
            }
            match self.step() {
                Some(outcome) if !outcome.finished => {}
                _ => return,
            }
        }
    }
}

/// Strip control and markup characters, collapse whitespace, cap the length
fn clean_name(name: &str, index: usize) -> String {
    let kept: String = name
        .trim()
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | '&'))
        .take(limits::MAX_NAME_LEN)
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        format!("pilot-{}", index + 1)
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::player::outbound_channel;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn room() -> Room {
        Room::new(
            "alpha",
            RoomSettings {
                seed: 7,
                ..Default::default()
            },
        )
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_first_join_seeds_world() {
        let mut room = room();
        assert_eq!(room.state(), RoomState::Waiting);

        room.add_player("ace", None).unwrap();
        room.step();

        let sim = room.sim();
        assert_eq!(room.state(), RoomState::InProgress);
        assert_eq!(sim.count_kind(EntityKind::Player), 1);
        assert_eq!(sim.count_kind(EntityKind::Boss), 1);
        assert_eq!(sim.count_kind(EntityKind::Drone), 2);
        assert_eq!(sim.count_kind(EntityKind::Tower), 2);
    }

    #[test]
    fn test_welcome_and_lobby_update() {
        let mut room = room();
        let (tx, mut rx) = outbound_channel();
        let joined = room.add_player("ace", Some(tx)).unwrap();

        let messages = drain(&mut rx);
        match &messages[0] {
            ServerMessage::Welcome {
                player_id,
                reconnect_token,
                lobby,
                ..
            } => {
                assert_eq!(*player_id, joined.player_id);
                assert_eq!(reconnect_token, &joined.reconnect_token);
                assert_eq!(lobby.state, RoomState::InProgress);
                assert_eq!(lobby.players.len(), 1);
            }
            other => panic!("expected welcome, got {:?}", other),
        }
        assert!(matches!(messages[1], ServerMessage::LobbyUpdate(_)));
    }

    #[test]
    fn test_join_rejected_when_full() {
        let mut room = Room::new(
            "small",
            RoomSettings {
                max_players: 2,
                seed: 1,
                ..Default::default()
            },
        );
        room.add_player("a", None).unwrap();
        room.add_player("b", None).unwrap();
        let err = room.add_player("c", None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RoomFull);
    }

    #[test]
    fn test_indices_are_reused() {
        let mut room = room();
        let a = room.add_player("a", None).unwrap();
        let b = room.add_player("b", None).unwrap();
        assert_eq!((a.index, b.index), (0, 1));

        room.leave(a.player_id);
        let c = room.add_player("c", None).unwrap();
        assert_eq!(c.index, 0);
    }

    #[test]
    fn test_reconnect_with_good_and_bad_token() {
        let mut room = room();
        let joined = room.add_player("ace", None).unwrap();
        let now = Instant::now();

        room.disconnect(joined.player_id, now);
        assert!(room.sim().session(joined.player_id).is_some());
        assert_eq!(room.sim().count_kind(EntityKind::Player), 0);

        let tick = room.tick();
        assert!(room.reconnect("not-a-token", None, now).is_none());
        assert_eq!(room.tick(), tick);
        assert!(!room.player(joined.player_id).unwrap().is_connected());

        let back = room
            .reconnect(&joined.reconnect_token, None, now + Duration::from_secs(1))
            .unwrap();
        assert_eq!(back.player_id, joined.player_id);
        let entity_id = back.entity_id.unwrap();
        assert_eq!(
            room.sim().entity(entity_id).and_then(|e| e.player_id()),
            Some(joined.player_id)
        );
    }

    #[test]
    fn test_stale_transport_close_is_ignored() {
        let mut room = room();
        let (first, _rx1) = outbound_channel();
        let joined = room.add_player("ace", Some(first.clone())).unwrap();

        // the same pilot comes back on a new socket before the old one closes
        let (second, mut rx2) = outbound_channel();
        let now = Instant::now();
        let back = room
            .reconnect(&joined.reconnect_token, Some(second.clone()), now)
            .unwrap();
        assert_eq!(back.entity_id, joined.entity_id);
        drain(&mut rx2);

        assert!(!room.release(joined.player_id, &first, now));
        let player = room.player(joined.player_id).unwrap();
        assert!(player.is_connected());
        assert!(player.is_bound_to(&second));
        let craft = joined.entity_id.unwrap();
        assert!(room.sim().contains(craft));

        room.step();
        room.step();
        room.step();
        assert!(drain(&mut rx2)
            .iter()
            .any(|m| matches!(m, ServerMessage::Snapshot(_))));

        // the live socket closing still disconnects
        assert!(room.release(joined.player_id, &second, now));
        assert!(!room.player(joined.player_id).unwrap().is_connected());
        assert!(!room.sim().contains(craft));
    }

    #[test]
    fn test_stalled_client_is_cut_off() {
        let mut room = room();
        let (tx, mut rx) = mpsc::channel(4);
        let joined = room.add_player("ace", Some(tx)).unwrap();

        // nobody reads: snapshots pile up, then get dropped, then the transport goes
        let budget = (limits::MAX_DROPPED_MESSAGES as u64 + 4) * limits::SNAPSHOT_INTERVAL_TICKS;
        for _ in 0..budget {
            room.step();
        }
        assert!(!room.player(joined.player_id).unwrap().is_connected());
        assert_eq!(room.player_count(), 1);

        assert_eq!(drain(&mut rx).len(), 4);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_finished_room_is_collectable_after_linger() {
        let mut room = room();
        let (tx, _rx) = outbound_channel();
        let joined = room.add_player("ace", Some(tx)).unwrap();

        room.play_to_victory();
        assert_eq!(room.state(), RoomState::Finished);
        assert!(room.player(joined.player_id).unwrap().is_connected());

        let now = Instant::now();
        assert!(!room.is_abandoned(now + Duration::from_secs(limits::FINISHED_LINGER_SECS + 1)));
        assert!(!room.is_collectable(now));
        assert!(room.is_collectable(now + Duration::from_secs(limits::FINISHED_LINGER_SECS + 1)));
        assert!(room.step().is_none());
    }

    #[test]
    fn test_sweep_purges_after_grace() {
        let mut room = room();
        let joined = room.add_player("ace", None).unwrap();
        let now = Instant::now();
        room.disconnect(joined.player_id, now);

        assert!(room.sweep_disconnected(now + Duration::from_secs(5)).is_empty());
        let purged = room.sweep_disconnected(now + Duration::from_secs(limits::RECONNECT_GRACE_SECS + 1));
        assert_eq!(purged, vec![joined.player_id]);
        assert!(room.is_empty());
        assert!(room.sim().session(joined.player_id).is_none());
        assert!(room
            .reconnect(&joined.reconnect_token, None, now + Duration::from_secs(40))
            .is_none());
    }

    #[test]
    fn test_input_requires_connected_player() {
        let mut room = room();
        let joined = room.add_player("ace", None).unwrap();
        let input = PlayerInput {
            up: true,
            aim: f32::NAN,
            ..Default::default()
        };
        assert!(room.handle_input(joined.player_id, input).is_ok());
        assert_eq!(room.sim().session(joined.player_id).unwrap().input.aim, 0.0);

        room.disconnect(joined.player_id, Instant::now());
        assert_eq!(
            room.handle_input(joined.player_id, input),
            Err(RoomError::NotInRoom)
        );
        assert_eq!(
            room.handle_input(Uuid::new_v4(), input),
            Err(RoomError::NotInRoom)
        );
    }

    #[test]
    fn test_upgrade_without_points_reports_false() {
        let mut room = room();
        let (tx, mut rx) = outbound_channel();
        let joined = room.add_player("ace", Some(tx)).unwrap();
        drain(&mut rx);

        assert_eq!(room.apply_upgrade(joined.player_id, "damage"), Ok(false));
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerMessage::UpgradeResult { applied: false, .. }]
        ));
        assert_eq!(
            room.apply_upgrade(joined.player_id, "luck"),
            Err(RoomError::UnknownStat("luck".to_string()))
        );
    }

    #[test]
    fn test_agent_commands_gated_by_mode_and_state() {
        let mut room = room();
        let cmd = json!({"v": 1, "command": "set_strategy", "params": {"name": "swarm"}});

        let waiting = room.agent_command(cmd.clone());
        assert_eq!(waiting.error, Some(ErrorCode::RoomNotInProgress));

        room.add_player("ace", None).unwrap();
        let scripted = room.agent_command(cmd.clone());
        assert_eq!(scripted.error, Some(ErrorCode::AgentModeDisabled));

        room.start_game(Some(ControlMode::Agent)).unwrap();
        let accepted = room.agent_command(cmd);
        assert!(accepted.ok);
        assert_eq!(room.agent_api().strategy(), Strategy::Swarm);
        assert_eq!(room.agent_api().rejected(), 2);
    }

    #[test]
    fn test_snapshot_cadence() {
        let mut room = room();
        let (tx, mut rx) = outbound_channel();
        room.add_player("ace", Some(tx)).unwrap();
        drain(&mut rx);

        for _ in 0..limits::SNAPSHOT_INTERVAL_TICKS * 4 {
            room.step();
        }
        let snapshots: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Snapshot(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(snapshots.len(), 4);
        assert!(snapshots.iter().all(|s| s.phase.is_some()));
        assert_eq!(snapshots[0].world.tick, limits::SNAPSHOT_INTERVAL_TICKS);
    }

    #[test]
    fn test_waiting_room_does_not_tick() {
        let mut room = room();
        assert!(room.step().is_none());
        assert_eq!(room.tick(), 0);
        assert!(room.is_abandoned(Instant::now() + Duration::from_secs(limits::RECONNECT_GRACE_SECS + 1)));
    }

    #[test]
    fn test_close_drops_transports() {
        let mut room = room();
        let (tx, mut rx) = outbound_channel();
        room.add_player("ace", Some(tx)).unwrap();
        room.close();
        drain(&mut rx);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("  ace  ", 0), "ace");
        assert_eq!(clean_name("", 2), "pilot-3");
        assert_eq!(clean_name("a  <b>\t c", 0), "a b c");
        assert_eq!(clean_name(&"x".repeat(100), 0).len(), limits::MAX_NAME_LEN);
    }
}
