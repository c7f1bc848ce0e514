//! Tuning constants shared by every replica

pub const WORLD_WIDTH: f32 = 1000.0;
pub const WORLD_HEIGHT: f32 = 1000.0;
pub const GRAVITY: f32 = -20.0;

// Lander handling
pub const LANDER_RADIUS: f32 = 10.0;
pub const LANDER_RESTITUTION: f32 = 0.7;
/// Radians per second
pub const TURN_RATE: f32 = 0.8;
/// Throttle units per second
pub const THROTTLE_RATE: f32 = 1.0;
pub const FULL_THROTTLE_FORCE: f32 = 15_000.0;
/// Fuel per second at full throttle
pub const THROTTLE_FUEL_BURN_RATE: f32 = 5.0;
/// Fuel per second while turning
pub const ROTATE_FUEL_BURN_RATE: f32 = 1.0;
pub const MAX_HEALTH: f32 = 100.0;
pub const MAX_FUEL: f32 = 100.0;

// Collision damage
pub const DAMAGE_FORCE_THRESHOLD: f32 = 60_000.0;
pub const DAMAGE_FORCE_DIVISOR: f32 = 4_000.0;
pub const TERRAIN_DAMAGE_MULTIPLIER: f32 = 1.0;
pub const CEILING_DAMAGE_MULTIPLIER: f32 = 0.5;
pub const ROCKET_DAMAGE_MULTIPLIER: f32 = 3.0;
pub const LANDER_DAMAGE_MULTIPLIER: f32 = 0.5;
/// Damage taken per hit when health is infinite
pub const TOKEN_DAMAGE: f32 = 1.0;

// Safe landing
pub const SAFE_LANDING_MAX_ROTATION: f32 = 0.15;
pub const SAFE_LANDING_MAX_SPEED: f32 = 2.0;
pub const PAD_SENSOR_HALF_HEIGHT: f32 = LANDER_RADIUS / 2.0;

// Rockets
pub const ROCKET_RESTITUTION: f32 = 0.9;

// Terrain generation
pub const TERRAIN_ITERATIONS: u32 = 8;
pub const TERRAIN_ROUGHNESS: f32 = 0.5;
pub const TERRAIN_MIN_HEIGHT: f32 = 10.0;
/// Fraction of the world height the tallest peak may reach
pub const TERRAIN_MAX_HEIGHT_RATIO: f32 = 0.4;
pub const SKY_RESTITUTION: f32 = 1.0;

// Lifecycle waits (seconds)
pub const RESET_GAME_WAIT_SECS: u64 = 10;
pub const WON_GAME_WAIT_SECS: u64 = 5;
pub const START_GAME_WAIT_SECS: u64 = 3;

/// How many acknowledged input ticks per lander go out with each partial sync
pub const ACKED_INPUTS_PER_PLAYER: usize = 100;
