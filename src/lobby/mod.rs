//! Rooms and the registry that owns them
//!
//! A room wraps one match and the players bound to it; the registry creates
//! rooms on demand, drives each one from its own tick task, and tears them
//! down once they are abandoned or finished, and on shutdown.

pub mod manager;
pub mod player;
pub mod room;

pub use manager::{RegistryError, RegistrySettings, RoomRegistry, SharedRoom};
pub use room::{ControlMode, Room, RoomError, RoomSettings, RoomState};
