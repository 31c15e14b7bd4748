use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::game::constants::room;
use crate::lobby::manager::RegistrySettings;
use crate::net::dos_protection::DoSConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port for both the WebSocket and admin HTTP routes
    pub port: u16,
    /// Maximum number of concurrent rooms
    pub max_rooms: usize,
    pub max_players_per_room: usize,
    /// How long a disconnected player's record is kept
    pub reconnect_grace: Duration,
    /// Agent HTTP requests allowed per source per window
    pub agent_http_max_per_window: u32,
    pub agent_http_window: Duration,
    /// Fixed simulation seed for every room (random when unset)
    pub room_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let dos = DoSConfig::default();
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            max_rooms: 64,
            max_players_per_room: room::MAX_PLAYERS,
            reconnect_grace: Duration::from_secs(room::RECONNECT_GRACE_SECS),
            agent_http_max_per_window: dos.agent_http_max_per_window,
            agent_http_window: dos.agent_http_window,
            room_seed: None,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parse::<IpAddr>("BIND_ADDRESS") {
            config.bind_address = addr;
        }

        if let Some(port) = env_parse::<u16>("PORT") {
            if port > 0 {
                config.port = port;
            } else {
                tracing::warn!("PORT must be > 0, using default");
            }
        }

        if let Some(max_rooms) = env_parse::<usize>("MAX_ROOMS") {
            if max_rooms > 0 && max_rooms <= 10_000 {
                config.max_rooms = max_rooms;
            } else {
                tracing::warn!("MAX_ROOMS must be 1-10000, using default");
            }
        }

        if let Some(max_players) = env_parse::<usize>("MAX_PLAYERS_PER_ROOM") {
            if (1..=16).contains(&max_players) {
                config.max_players_per_room = max_players;
            } else {
                tracing::warn!("MAX_PLAYERS_PER_ROOM must be 1-16, using default");
            }
        }

        if let Some(secs) = env_parse::<u64>("RECONNECT_GRACE_SECS") {
            config.reconnect_grace = Duration::from_secs(secs);
        }

        if let Some(max) = env_parse::<u32>("AGENT_HTTP_MAX_PER_WINDOW") {
            if max > 0 {
                config.agent_http_max_per_window = max;
            } else {
                tracing::warn!("AGENT_HTTP_MAX_PER_WINDOW must be > 0, using default");
            }
        }

        if let Some(secs) = env_parse::<u64>("AGENT_HTTP_WINDOW_SECS") {
            if secs > 0 {
                config.agent_http_window = Duration::from_secs(secs);
            } else {
                tracing::warn!("AGENT_HTTP_WINDOW_SECS must be > 0, using default");
            }
        }

        if let Some(seed) = env_parse::<u64>("ROOM_SEED") {
            config.room_seed = Some(seed);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.max_rooms == 0 {
            return Err("max_rooms must be at least 1".to_string());
        }
        if self.max_players_per_room == 0 {
            return Err("max_players_per_room must be at least 1".to_string());
        }
        if self.agent_http_window.is_zero() {
            return Err("agent_http_window cannot be zero".to_string());
        }
        Ok(())
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            max_rooms: self.max_rooms,
            max_players: self.max_players_per_room,
            reconnect_grace: self.reconnect_grace,
            seed: self.room_seed,
            ..Default::default()
        }
    }

    pub fn dos_config(&self) -> DoSConfig {
        DoSConfig {
            agent_http_max_per_window: self.agent_http_max_per_window,
            agent_http_window: self.agent_http_window,
            ..Default::default()
        }
    }
}

/// Read and parse an env var, warning when it is set but invalid
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_players_per_room, room::MAX_PLAYERS);
        assert_eq!(config.room_seed, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = ServerConfig::load_or_default();
        assert!(config.port > 0);
    }

    #[test]
    fn test_validate_rejects_zero_rooms() {
        let config = ServerConfig {
            max_rooms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_settings() {
        let config = ServerConfig {
            max_rooms: 3,
            room_seed: Some(9),
            agent_http_max_per_window: 5,
            ..Default::default()
        };
        let registry = config.registry_settings();
        assert_eq!(registry.max_rooms, 3);
        assert_eq!(registry.seed, Some(9));
        assert_eq!(config.dos_config().agent_http_max_per_window, 5);
    }
}
