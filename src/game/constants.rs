//! Gameplay tunables.
//!
//! All speeds, damages and cooldowns are per tick. One second of game time is
//! `physics::TICKS_PER_SECOND` ticks.

/// Tick timing and world bounds
pub mod physics {
    /// Server tick rate in Hz
    pub const TICK_RATE: u32 = 30;
    /// Ticks in one second of game time
    pub const TICKS_PER_SECOND: u64 = TICK_RATE as u64;
    /// Tick duration in milliseconds
    pub const TICK_DURATION_MS: u64 = 1000 / TICK_RATE as u64;
    /// World width in world units (origin top-left)
    pub const WORLD_WIDTH: f32 = 3200.0;
    /// World height in world units
    pub const WORLD_HEIGHT: f32 = 2400.0;
    /// Projectiles leaving the world by more than this are dropped
    pub const OUT_OF_BOUNDS_MARGIN: f32 = 50.0;
}

/// Player craft handling and baseline stats
pub mod player {
    pub const RADIUS: f32 = 18.0;
    pub const BASE_HP: f32 = 100.0;
    /// Top speed before upgrades (units per tick)
    pub const BASE_MAX_SPEED: f32 = 6.0;
    /// Velocity change per tick while input is held
    pub const ACCELERATION: f32 = 0.6;
    /// Velocity change per tick toward rest with no input
    pub const BRAKE: f32 = 0.35;
    /// Spawn band along the bottom edge of the world
    pub const SPAWN_Y_MIN: f32 = 1900.0;
    pub const SPAWN_Y_MAX: f32 = 2200.0;
    pub const SPAWN_X_MARGIN: f32 = 400.0;
}

/// Player weapons
pub mod weapons {
    pub const BULLET_SPEED: f32 = 14.0;
    pub const BULLET_DAMAGE: f32 = 10.0;
    pub const BULLET_RADIUS: f32 = 4.0;
    pub const BULLET_TTL: u32 = 60;
    pub const BULLET_COOLDOWN: u32 = 8;
    /// Angle between adjacent barrels of a multi-cannon spread
    pub const SPREAD_STEP: f32 = 0.14;

    pub const MISSILE_SPEED: f32 = 9.0;
    pub const MISSILE_DAMAGE: f32 = 35.0;
    pub const MISSILE_RADIUS: f32 = 6.0;
    pub const MISSILE_TTL: u32 = 120;
    pub const MISSILE_COOLDOWN: u32 = 90;
    /// Maximum heading change per tick (radians)
    pub const MISSILE_TURN_RATE: f32 = 0.08;

    pub const MINE_DAMAGE: f32 = 45.0;
    pub const MINE_RADIUS: f32 = 12.0;
    pub const MINE_TTL: u32 = 600;
    pub const MINE_COOLDOWN: u32 = 150;
}

/// Leveling and upgrades
pub mod progression {
    pub const BASE_XP_TO_LEVEL: u32 = 100;
    /// Extra XP required per level already gained
    pub const XP_STEP_PER_LEVEL: u32 = 50;
    /// Levels that grant a cannon instead of an upgrade point
    pub const MILESTONE_LEVELS: [u32; 3] = [5, 10, 15];
    pub const MAX_CANNONS: u32 = 4;
    pub const MAX_UPGRADE_LEVEL: u8 = 5;

    pub const DAMAGE_PER_LEVEL: f32 = 0.15;
    pub const SPEED_PER_LEVEL: f32 = 0.5;
    pub const FIRE_RATE_TICKS_PER_LEVEL: u32 = 1;
    pub const HP_PER_LEVEL: f32 = 20.0;
}

/// Combat resolution
pub mod combat {
    use std::f32::consts::FRAC_PI_4;

    /// Half-width of the Tank's armored frontal arc
    pub const FRONT_ARC_HALF_ANGLE: f32 = FRAC_PI_4;
    /// Fraction of damage that gets through the frontal arc
    pub const FRONT_ARMOR_FACTOR: f32 = 0.3;
    /// Flat damage per tick while a player craft overlaps an adversary craft
    pub const BODY_COLLISION_DAMAGE: f32 = 1.5;
}

/// Neutral energy pickups
pub mod pickups {
    pub const MAX_CONCURRENT: usize = 20;
    pub const SPAWN_INTERVAL: u32 = 90;
    pub const RADIUS: f32 = 10.0;
    /// XP granted when a player collects one
    pub const XP_VALUE: u32 = 10;
    /// Adversary resources granted when an adversary craft collects one
    pub const RESOURCE_VALUE: f32 = 5.0;
    /// Ticks before an uncollected pickup is moved elsewhere
    pub const LIFETIME: u32 = 900;
    pub const EDGE_MARGIN: f32 = 100.0;
}

/// Adversary behavior
pub mod ai {
    /// Patrol runs at this fraction of full speed
    pub const PATROL_SPEED_FACTOR: f32 = 0.5;
    /// Orbit-and-fire is entered inside this fraction of weapon range
    pub const ORBIT_ENTER_FRACTION: f32 = 0.8;
    /// Preferred stand-off distance as a fraction of weapon range
    pub const STANDOFF_FRACTION: f32 = 0.65;
    /// Distance behind the guarded point a flanker aims for
    pub const FLANK_DISTANCE: f32 = 160.0;
    /// Return-to-base finishes within this distance of the patrol ring
    pub const HOME_TOLERANCE: f32 = 40.0;
    /// Steering blend per tick toward the desired velocity
    pub const STEERING: f32 = 0.2;
    /// Maximum facing change per tick for turreted kinds
    pub const TURN_RATE: f32 = 0.06;
    pub const ENEMY_BULLET_RADIUS: f32 = 5.0;
    pub const ENEMY_BULLET_TTL: u32 = 90;
}

/// Boss encounter
pub mod boss {
    pub const HP: f32 = 1500.0;
    pub const RADIUS: f32 = 60.0;
    pub const FINAL_HP: f32 = 3000.0;
    pub const FINAL_RADIUS: f32 = 70.0;
    /// Ticks between the first form's death and the final form's arrival
    pub const DEATH_SEQUENCE_TICKS: u32 = 90;
    /// The final form teleports each time this fraction of max HP is lost
    pub const TELEPORT_STEP: f32 = 0.2;
    /// Number of teleport thresholds (80%, 60%, 40%, 20%)
    pub const TELEPORT_THRESHOLDS: u32 = 4;
    /// Teleport destinations keep this far from the world edge
    pub const TELEPORT_MARGIN: f32 = 200.0;
    pub const SPAWN_X: f32 = 1600.0;
    pub const SPAWN_Y: f32 = 500.0;
}

/// Adversary economy
pub mod economy {
    pub const STARTING_BALANCE: f32 = 200.0;
    /// Resource accrual per tick (15 per second)
    pub const INCOME_PER_TICK: f32 = 0.5;
    /// Ticks between a build request and its spawn
    pub const BUILD_COOLDOWN_TICKS: u64 = 60;
    /// Towers must be placed within this distance of the anchor
    pub const TOWER_MAX_SPAWN_DISTANCE: f32 = 600.0;
}

/// External command gateway
pub mod agent {
    /// Successful commands allowed per window
    pub const AGENT_BUDGET_MAX: u32 = 10;
    /// Window length in ticks (10 seconds)
    pub const AGENT_BUDGET_WINDOW_TICKS: u64 = 300;
    /// Envelope version accepted by the gateway
    pub const PROTOCOL_VERSION: u32 = 1;
    /// Scripted director decision interval in ticks
    pub const FALLBACK_DECISION_TICKS: u64 = 90;
}

/// Room lifecycle
pub mod room {
    pub const MAX_PLAYERS: usize = 4;
    /// Snapshot every N ticks (10 Hz at 30 Hz tick rate)
    pub const SNAPSHOT_INTERVAL_TICKS: u64 = 3;
    pub const RECONNECT_GRACE_SECS: u64 = 30;
    pub const STARTER_DRONES: usize = 2;
    pub const STARTER_TOWERS: usize = 2;
    /// Starter drones circle the boss at this distance
    pub const STARTER_DRONE_DISTANCE: f32 = 260.0;
    pub const STARTER_TOWER_DISTANCE: f32 = 340.0;
    /// Longest display name kept from `join_room`
    pub const MAX_NAME_LEN: usize = 24;
    /// A finished room stays listed this long before the sweep drops it
    pub const FINISHED_LINGER_SECS: u64 = 10;
    /// Per-player outbound queue depth
    pub const OUTBOUND_QUEUE_CAPACITY: usize = 128;
    /// Consecutive messages dropped on a full queue before the player is cut off
    pub const MAX_DROPPED_MESSAGES: u32 = 30;
}
