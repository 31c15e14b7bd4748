//! Arena Siege Server Library
//!
//! An authoritative multiplayer arena server: players fight a scripted or
//! agent-driven adversary side (a four-phase boss, its units and towers) in
//! rooms ticked at a fixed rate, over WebSocket.

pub mod agent;
pub mod config;
pub mod game;
pub mod lobby;
pub mod metrics;
pub mod net;
pub mod util;
