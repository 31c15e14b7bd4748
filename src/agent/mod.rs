//! Adversary command surface
//!
//! An external agent (or the scripted fallback) drives the adversary side
//! through a small, budgeted command set.

pub mod api;
pub mod command;
pub mod fake_ai;

pub use api::{AgentApi, Applied, CommandContext};
pub use command::{AgentCommand, CommandError, CommandOutcome, Strategy};
pub use fake_ai::FakeAi;
