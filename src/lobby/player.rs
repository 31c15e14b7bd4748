use rand::RngCore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::game::constants::room::{MAX_DROPPED_MESSAGES, OUTBOUND_QUEUE_CAPACITY};
use crate::game::state::PlayerId;
use crate::net::protocol::{LobbyPlayerInfo, ServerMessage};

/// Outbound half of a player's transport
pub type PlayerTx = mpsc::Sender<ServerMessage>;

/// Bounded queue between the room and one socket writer
pub fn outbound_channel() -> (PlayerTx, mpsc::Receiver<ServerMessage>) {
    mpsc::channel(OUTBOUND_QUEUE_CAPACITY)
}

/// Opaque reconnect credential handed out in `welcome`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ReconnectToken(String);

impl ReconnectToken {
    /// 32 random bytes, hex encoded
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, candidate: &str) -> bool {
        // compare every byte regardless of where the first mismatch is
        self.0.len() == candidate.len()
            && self
                .0
                .bytes()
                .zip(candidate.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

impl std::fmt::Debug for ReconnectToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReconnectToken(..)")
    }
}

/// Room-side record of one player
#[derive(Debug)]
pub struct RoomPlayer {
    pub id: PlayerId,
    pub name: String,
    /// Seat in join order, reused after a leave
    pub index: usize,
    pub reconnect_token: ReconnectToken,
    tx: Option<PlayerTx>,
    disconnected_at: Option<Instant>,
    /// Consecutive sends refused by a full queue
    dropped: AtomicU32,
}

impl RoomPlayer {
    pub fn new(id: PlayerId, name: String, index: usize, tx: Option<PlayerTx>) -> Self {
        Self {
            id,
            name,
            index,
            reconnect_token: ReconnectToken::generate(),
            tx,
            disconnected_at: None,
            dropped: AtomicU32::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.disconnected_at.is_none()
    }

    pub fn disconnected_at(&self) -> Option<Instant> {
        self.disconnected_at
    }

    /// Drop the transport and start the grace clock
    pub fn disconnect(&mut self, now: Instant) {
        self.tx = None;
        self.disconnected_at = Some(now);
        self.dropped.store(0, Ordering::Relaxed);
    }

    /// Bind a new transport, replacing any live one
    pub fn reconnect(&mut self, tx: Option<PlayerTx>) {
        self.tx = tx;
        self.disconnected_at = None;
        self.dropped.store(0, Ordering::Relaxed);
    }

    /// Whether `tx` feeds the same queue as the bound transport
    pub fn is_bound_to(&self, tx: &PlayerTx) -> bool {
        self.tx.as_ref().is_some_and(|own| own.same_channel(tx))
    }

    pub fn grace_expired(&self, now: Instant, grace: Duration) -> bool {
        self.disconnected_at
            .is_some_and(|at| now.saturating_duration_since(at) > grace)
    }

    /// Queue a message without waiting. A full queue drops the message and
    /// counts it; a closed or missing transport is ignored.
    pub fn send(&self, message: ServerMessage) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => {
                self.dropped.store(0, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(player_id = %self.id, dropped, "outbound queue full, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped_messages(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The client stopped draining its queue
    pub fn is_lagging(&self) -> bool {
        self.dropped_messages() >= MAX_DROPPED_MESSAGES
    }

    pub fn info(&self) -> LobbyPlayerInfo {
        LobbyPlayerInfo {
            player_id: self.id,
            name: self.name.clone(),
            index: self.index,
            connected: self.is_connected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_token_format() {
        let token = ReconnectToken::generate();
        assert_eq!(token.as_str().len(), 64);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, ReconnectToken::generate());
    }

    #[test]
    fn test_token_matches() {
        let token = ReconnectToken::generate();
        let copy = token.as_str().to_string();
        assert!(token.matches(&copy));
        assert!(!token.matches(&copy[..63]));
        assert!(!token.matches(&"0".repeat(64)));
    }

    fn notice() -> ServerMessage {
        ServerMessage::error(crate::net::protocol::ErrorCode::NotInRoom, None)
    }

    #[test]
    fn test_full_queue_drops_instead_of_growing() {
        let (tx, mut rx) = mpsc::channel(2);
        let player = RoomPlayer::new(Uuid::new_v4(), "ace".to_string(), 0, Some(tx));

        assert!(player.send(notice()));
        assert!(player.send(notice()));
        assert!(!player.send(notice()));
        assert!(!player.send(notice()));
        assert_eq!(player.dropped_messages(), 2);
        assert!(player.is_connected());

        // only what fit was queued
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        // a successful send clears the streak
        assert!(player.send(notice()));
        assert_eq!(player.dropped_messages(), 0);
    }

    #[test]
    fn test_lagging_after_drop_limit() {
        let (tx, _rx) = mpsc::channel(1);
        let player = RoomPlayer::new(Uuid::new_v4(), "ace".to_string(), 0, Some(tx));
        assert!(player.send(notice()));
        for _ in 0..MAX_DROPPED_MESSAGES {
            assert!(!player.is_lagging());
            player.send(notice());
        }
        assert!(player.is_lagging());
    }

    #[test]
    fn test_bound_transport_identity() {
        let (first, _rx1) = outbound_channel();
        let (second, _rx2) = outbound_channel();
        let mut player = RoomPlayer::new(Uuid::new_v4(), "ace".to_string(), 0, Some(first.clone()));
        assert!(player.is_bound_to(&first));
        assert!(!player.is_bound_to(&second));

        player.reconnect(Some(second.clone()));
        assert!(!player.is_bound_to(&first));
        assert!(player.is_bound_to(&second));

        player.disconnect(Instant::now());
        assert!(!player.is_bound_to(&second));
    }

    #[test]
    fn test_disconnect_and_grace() {
        let (tx, mut rx) = outbound_channel();
        let mut player = RoomPlayer::new(Uuid::new_v4(), "ace".to_string(), 0, Some(tx));
        assert!(player.send(notice()));
        assert!(rx.try_recv().is_ok());

        let now = Instant::now();
        player.disconnect(now);
        assert!(!player.is_connected());
        assert!(!player.send(notice()));
        assert!(!player.grace_expired(now + Duration::from_secs(5), Duration::from_secs(30)));
        assert!(player.grace_expired(now + Duration::from_secs(31), Duration::from_secs(30)));

        player.reconnect(None);
        assert!(player.is_connected());
        assert!(!player.grace_expired(now + Duration::from_secs(60), Duration::from_secs(30)));
    }
}
