//! Time utilities for the fixed-tick simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate shared by every replica. Physics integrates with exactly this step.
pub const STEPS_PER_SECOND: u64 = 60;
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / STEPS_PER_SECOND;

/// Wall-clock length of one tick
pub fn tick_duration() -> Duration {
    Duration::from_micros(TICK_DURATION_MICROS)
}

/// Calculate delta time for physics (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / STEPS_PER_SECOND as f32
}

/// Convert a wait in whole seconds to ticks
pub fn secs_to_ticks(secs: u64) -> u64 {
    secs * STEPS_PER_SECOND
}

/// Number of whole ticks that fit in `elapsed`
pub fn ticks_elapsed(elapsed: Duration) -> u64 {
    (elapsed.as_micros() / TICK_DURATION_MICROS as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_elapsed_floors_partial_ticks() {
        assert_eq!(ticks_elapsed(Duration::ZERO), 0);
        assert_eq!(ticks_elapsed(Duration::from_micros(TICK_DURATION_MICROS - 1)), 0);
        assert_eq!(ticks_elapsed(Duration::from_secs(1)), STEPS_PER_SECOND);
        assert_eq!(ticks_elapsed(Duration::from_millis(1_010)), STEPS_PER_SECOND);
    }

    #[test]
    fn secs_to_ticks_uses_step_rate() {
        assert_eq!(secs_to_ticks(10), 600);
    }
}
