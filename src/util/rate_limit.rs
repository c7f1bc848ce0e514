//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Max socket messages per second per connection. Inputs are edge-triggered
/// (key down/up), so one per tick is generous.
pub const INPUT_RATE_LIMIT: u32 = 60;

/// Max chat lines per second per connection
pub const CHAT_RATE_LIMIT: u32 = 2;

/// Per-connection rate limiter state
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    input_limiter: Arc<Limiter>,
    chat_limiter: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new() -> Self {
        Self {
            input_limiter: create_limiter(INPUT_RATE_LIMIT),
            chat_limiter: create_limiter(CHAT_RATE_LIMIT),
        }
    }

    /// Check if a message is allowed (returns true if allowed)
    pub fn check_input(&self) -> bool {
        self.input_limiter.check().is_ok()
    }

    /// Chat has its own, tighter budget on top of the input budget
    pub fn check_chat(&self) -> bool {
        self.chat_limiter.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_budget_is_exhausted_after_burst() {
        let limiter = ConnectionRateLimiter::new();
        assert!(limiter.check_chat());
        assert!(limiter.check_chat());
        assert!(!limiter.check_chat());
        assert!(limiter.check_input());
    }
}
