pub mod boss;
pub mod constants;
pub mod economy;
pub mod performance;
pub mod simulation;
pub mod state;
pub mod systems;
