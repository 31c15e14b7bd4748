use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::game::constants::physics::TICK_DURATION_MS;
use crate::lobby::room::{Room, RoomListing, RoomSettings};
use crate::metrics::Metrics;
use crate::net::protocol::ErrorCode;
use crate::util::FxMap;

/// A room behind its lock, shared by its tick task and every connection in it
pub type SharedRoom = Arc<RwLock<Room>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("room limit of {0} reached")]
    RegistryFull(usize),
    #[error("room '{0}' not found")]
    RoomNotFound(String),
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RegistryError::RegistryFull(_) => ErrorCode::RegistryFull,
            RegistryError::RoomNotFound(_) => ErrorCode::RoomNotFound,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub max_rooms: usize,
    pub max_players: usize,
    pub reconnect_grace: Duration,
    /// Fixed seed for every room, or random per room
    pub seed: Option<u64>,
    pub tick_interval: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        let room = RoomSettings::default();
        Self {
            max_rooms: 64,
            max_players: room.max_players,
            reconnect_grace: room.reconnect_grace,
            seed: None,
            tick_interval: Duration::from_millis(TICK_DURATION_MS),
        }
    }
}

struct RoomEntry {
    room: SharedRoom,
    task: JoinHandle<()>,
}

/// Bounded set of isolated rooms keyed by id
pub struct RoomRegistry {
    settings: RegistrySettings,
    rooms: RwLock<FxMap<String, RoomEntry>>,
    metrics: Arc<Metrics>,
}

impl RoomRegistry {
    pub fn new(settings: RegistrySettings, metrics: Arc<Metrics>) -> Self {
        Self {
            settings,
            rooms: RwLock::new(FxMap::default()),
            metrics,
        }
    }

    pub fn max_rooms(&self) -> usize {
        self.settings.max_rooms
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }

    /// Return the room with this id, creating it (and its tick task) if needed
    pub async fn get_or_create(&self, room_id: &str) -> Result<SharedRoom, RegistryError> {
        if let Some(entry) = self.rooms.read().await.get(room_id) {
            return Ok(entry.room.clone());
        }

        let mut rooms = self.rooms.write().await;
        // another caller may have created it between the two locks
        if let Some(entry) = rooms.get(room_id) {
            return Ok(entry.room.clone());
        }
        if rooms.len() >= self.settings.max_rooms {
            return Err(RegistryError::RegistryFull(self.settings.max_rooms));
        }

        let room_settings = RoomSettings {
            max_players: self.settings.max_players,
            reconnect_grace: self.settings.reconnect_grace,
            seed: self.settings.seed.unwrap_or_else(rand::random),
        };
        let room: SharedRoom = Arc::new(RwLock::new(Room::new(room_id, room_settings)));
        let task = tokio::spawn(run_room(
            room.clone(),
            self.settings.tick_interval,
            self.metrics.clone(),
        ));

        rooms.insert(
            room_id.to_string(),
            RoomEntry {
                room: room.clone(),
                task,
            },
        );
        self.metrics.room_created();
        info!(room_id, rooms = rooms.len(), "room created");
        Ok(room)
    }

    pub async fn get(&self, room_id: &str) -> Option<SharedRoom> {
        self.rooms.read().await.get(room_id).map(|e| e.room.clone())
    }

    pub async fn list(&self) -> Vec<RoomListing> {
        let handles: Vec<SharedRoom> = self
            .rooms
            .read()
            .await
            .values()
            .map(|e| e.room.clone())
            .collect();

        let mut listings = Vec::with_capacity(handles.len());
        for room in handles {
            listings.push(room.read().await.listing());
        }
        listings.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        listings
    }

    /// Purge expired reconnect records, then drop abandoned and finished rooms.
    /// Removal closes any transport still bound to a finished room.
    pub async fn sweep(&self, now: Instant) -> usize {
        let handles: Vec<(String, SharedRoom)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, e)| (id.clone(), e.room.clone()))
            .collect();

        let mut collectable = Vec::new();
        for (room_id, room) in handles {
            let mut room = room.write().await;
            let purged = room.sweep_disconnected(now);
            if !purged.is_empty() {
                debug!(room_id = %room_id, purged = purged.len(), "purged disconnected players");
            }
            if room.is_collectable(now) {
                collectable.push(room_id);
            }
        }

        for room_id in &collectable {
            self.remove(room_id).await;
        }
        collectable.len()
    }

    /// Stop the room's task and close every transport in it
    pub async fn remove(&self, room_id: &str) -> bool {
        let Some(entry) = self.rooms.write().await.remove(room_id) else {
            return false;
        };
        entry.task.abort();
        entry.room.write().await.close();
        self.metrics.room_removed();
        info!(room_id, "room removed");
        true
    }

    pub async fn shutdown_all(&self) {
        let entries: Vec<(String, RoomEntry)> = self.rooms.write().await.drain().collect();
        for (room_id, entry) in entries {
            entry.task.abort();
            entry.room.write().await.close();
            self.metrics.room_removed();
            debug!(room_id = %room_id, "room shut down");
        }
        info!("all rooms shut down");
    }
}

/// Fixed-rate loop for one room. Ends when the match is finished.
async fn run_room(room: SharedRoom, tick_interval: Duration, metrics: Arc<Metrics>) {
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let outcome = room.write().await.step();
        let Some(outcome) = outcome else {
            continue;
        };
        metrics.record_tick_time(outcome.duration);
        if outcome.finished {
            metrics.rooms_finished.fetch_add(1, Ordering::Relaxed);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::room::FINISHED_LINGER_SECS;
    use crate::lobby::player::outbound_channel;
    use crate::lobby::RoomState;
    use tokio_test::{assert_err, assert_ok};

    fn registry(max_rooms: usize) -> RoomRegistry {
        RoomRegistry::new(
            RegistrySettings {
                max_rooms,
                seed: Some(11),
                ..Default::default()
            },
            Arc::new(Metrics::new()),
        )
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_room() {
        let registry = registry(4);
        let a = registry.get_or_create("alpha").await.unwrap();
        let b = registry.get_or_create("alpha").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_registry_full() {
        let registry = registry(1);
        assert_ok!(registry.get_or_create("alpha").await);
        let err = assert_err!(registry.get_or_create("beta").await.map(|_| ()));
        assert_eq!(err.code(), ErrorCode::RegistryFull);
        assert!(registry.get("beta").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_closes_room() {
        let registry = registry(4);
        let room = registry.get_or_create("alpha").await.unwrap();
        let (tx, mut rx) = outbound_channel();
        room.write().await.add_player("ace", Some(tx)).unwrap();

        assert!(registry.remove("alpha").await);
        assert!(!registry.remove("alpha").await);
        while rx.recv().await.is_some() {}
        assert!(room.read().await.is_empty());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_drops_abandoned_rooms() {
        let registry = registry(4);
        registry.get_or_create("alpha").await.unwrap();
        let busy = registry.get_or_create("beta").await.unwrap();
        busy.write().await.add_player("ace", None).unwrap();

        let later = Instant::now() + registry.settings().reconnect_grace + Duration::from_secs(1);
        assert_eq!(registry.sweep(later).await, 1);
        assert!(registry.get("alpha").await.is_none());
        assert!(registry.get("beta").await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_drops_finished_room_with_connected_player() {
        let registry = registry(1);
        let room = registry.get_or_create("alpha").await.unwrap();
        let (tx, mut rx) = outbound_channel();
        let joined = room.write().await.add_player("ace", Some(tx)).unwrap();
        room.write().await.play_to_victory();
        {
            let guard = room.read().await;
            assert_eq!(guard.state(), RoomState::Finished);
            assert!(guard.player(joined.player_id).unwrap().is_connected());
        }

        // still inside the linger: kept so the client can read the result
        assert_eq!(registry.sweep(Instant::now()).await, 0);
        assert!(registry.get("alpha").await.is_some());

        let later = Instant::now() + Duration::from_secs(FINISHED_LINGER_SECS + 1);
        assert_eq!(registry.sweep(later).await, 1);
        assert!(registry.get("alpha").await.is_none());
        while rx.recv().await.is_some() {}

        // the slot and the id are free again
        let fresh = assert_ok!(registry.get_or_create("alpha").await);
        assert!(!Arc::ptr_eq(&fresh, &room));
        assert_ok!(fresh.write().await.add_player("bee", None));
    }

    #[tokio::test]
    async fn test_listing_is_sorted() {
        let registry = registry(4);
        registry.get_or_create("zeta").await.unwrap();
        registry.get_or_create("alpha").await.unwrap();
        let ids: Vec<_> = registry.list().await.into_iter().map(|l| l.room_id).collect();
        assert_eq!(ids, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_ticks_once_started() {
        let registry = registry(4);
        let room = registry.get_or_create("alpha").await.unwrap();
        room.write().await.add_player("ace", None).unwrap();

        tokio::time::sleep(Duration::from_millis(TICK_DURATION_MS * 10)).await;
        let tick = room.read().await.tick();
        assert!(tick >= 5, "tick was {}", tick);
        registry.shutdown_all().await;
        assert!(registry.is_empty().await);
    }
}
