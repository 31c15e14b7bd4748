//! Process-wide counters for the admin surface
//!
//! Rendered as Prometheus text on `/metrics` and as JSON on `/metrics/json`.

use parking_lot::RwLock;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const TICK_HISTORY: usize = 1000;

#[derive(Debug)]
pub struct Metrics {
    // Rooms
    pub rooms_active: AtomicU64,
    pub rooms_created: AtomicU64,
    pub rooms_finished: AtomicU64,

    // Players and transports
    pub players_connected: AtomicU64,
    pub connections_active: AtomicU64,
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_throttled: AtomicU64,

    // Agent commands
    pub commands_accepted: AtomicU64,
    pub commands_rejected: AtomicU64,
    pub agent_http_limited: AtomicU64,

    // Tick timing (microseconds), across all rooms
    pub tick_count: AtomicU64,
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,

    start_time: Instant,
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            rooms_active: AtomicU64::new(0),
            rooms_created: AtomicU64::new(0),
            rooms_finished: AtomicU64::new(0),
            players_connected: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_throttled: AtomicU64::new(0),
            commands_accepted: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            agent_http_limited: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    /// Record one room tick and refresh the percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;
            self.tick_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us
                .store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn record_command(&self, ok: bool) {
        if ok {
            self.commands_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.commands_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn room_created(&self) {
        self.rooms_created.fetch_add(1, Ordering::Relaxed);
        self.rooms_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_removed(&self) {
        // saturating: a double remove must not wrap
        let _ = self
            .rooms_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("arena_siege_rooms_active", "Rooms currently registered", "gauge",
            self.rooms_active.load(Ordering::Relaxed));
        metric!("arena_siege_rooms_created_total", "Rooms created since start", "counter",
            self.rooms_created.load(Ordering::Relaxed));
        metric!("arena_siege_rooms_finished_total", "Matches that reached a result", "counter",
            self.rooms_finished.load(Ordering::Relaxed));

        metric!("arena_siege_players_connected", "Players bound to a room", "gauge",
            self.players_connected.load(Ordering::Relaxed));
        metric!("arena_siege_connections_active", "Open WebSocket connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("arena_siege_messages_received_total", "Inbound frames", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("arena_siege_messages_sent_total", "Outbound frames", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("arena_siege_messages_throttled_total", "Inbound frames refused by the per-connection limiter", "counter",
            self.messages_throttled.load(Ordering::Relaxed));

        metric!("arena_siege_agent_commands_accepted_total", "Agent commands applied", "counter",
            self.commands_accepted.load(Ordering::Relaxed));
        metric!("arena_siege_agent_commands_rejected_total", "Agent commands rejected", "counter",
            self.commands_rejected.load(Ordering::Relaxed));
        metric!("arena_siege_agent_http_limited_total", "Agent HTTP requests refused by the per-source limiter", "counter",
            self.agent_http_limited.load(Ordering::Relaxed));

        metric!("arena_siege_tick_count", "Room ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("arena_siege_tick_time_microseconds", "Most recent tick time", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("arena_siege_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("arena_siege_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("arena_siege_tick_time_max_microseconds", "Maximum tick time in the history window", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("arena_siege_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    pub fn to_json(&self) -> serde_json::Value {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        json!({
            "rooms": {
                "active": load(&self.rooms_active),
                "created": load(&self.rooms_created),
                "finished": load(&self.rooms_finished),
            },
            "network": {
                "players_connected": load(&self.players_connected),
                "connections": load(&self.connections_active),
                "messages_received": load(&self.messages_received),
                "messages_sent": load(&self.messages_sent),
                "messages_throttled": load(&self.messages_throttled),
            },
            "agent": {
                "accepted": load(&self.commands_accepted),
                "rejected": load(&self.commands_rejected),
                "http_limited": load(&self.agent_http_limited),
            },
            "performance": {
                "tick_count": load(&self.tick_count),
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_p99_us": load(&self.tick_time_p99_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.rooms_active.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) >= 1000);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_room_gauge_never_wraps() {
        let metrics = Metrics::new();
        metrics.room_created();
        metrics.room_removed();
        metrics.room_removed();
        assert_eq!(metrics.rooms_active.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.rooms_created.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.players_connected.store(3, Ordering::Relaxed);
        metrics.record_command(true);
        metrics.record_command(false);
        metrics.record_command(false);

        let output = metrics.to_prometheus();
        assert!(output.contains("arena_siege_players_connected 3"));
        assert!(output.contains("arena_siege_agent_commands_accepted_total 1"));
        assert!(output.contains("arena_siege_agent_commands_rejected_total 2"));
        assert!(output.contains("# TYPE arena_siege_tick_count counter"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.room_created();
        let value = metrics.to_json();
        assert_eq!(value["rooms"]["active"], 1);
        assert!(value["performance"].is_object());
    }
}
