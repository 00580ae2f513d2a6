//! Exponential backoff for endpoint reconnect delays: minimum 1 second,
//! maximum 60 seconds, doubling each attempt, with no jitter (the bounds
//! in the design are exact; a jitter term was never specified).

use std::time::Duration;

/// The initial and minimum delay between reconnect attempts.
pub const MIN_DELAY: Duration = Duration::from_secs(1);
/// The maximum delay between reconnect attempts, reached once doubling
/// would otherwise exceed it.
pub const MAX_DELAY: Duration = Duration::from_secs(60);
const FACTOR: u32 = 2;

/// Tracks the next reconnect delay across repeated transient failures.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { next: MIN_DELAY }
    }
}

impl Backoff {
    /// Resets the delay back to [`MIN_DELAY`], as happens after any
    /// successful cycle.
    pub fn reset(&mut self) {
        self.next = MIN_DELAY;
    }

    /// Returns the delay to wait before the next attempt, then doubles it
    /// (capped at [`MAX_DELAY`]) for the attempt after that.
    pub fn advance(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * FACTOR).min(MAX_DELAY);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_doubles_up_to_the_maximum() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.advance(), Duration::from_secs(1));
        assert_eq!(backoff.advance(), Duration::from_secs(2));
        assert_eq!(backoff.advance(), Duration::from_secs(4));
    }

    #[test]
    fn advance_never_exceeds_the_maximum() {
        let mut backoff = Backoff::default();
        for _ in 0..20 {
            backoff.advance();
        }
        assert_eq!(backoff.advance(), MAX_DELAY);
    }

    #[test]
    fn reset_returns_to_the_minimum_delay() {
        let mut backoff = Backoff::default();
        backoff.advance();
        backoff.advance();
        backoff.reset();
        assert_eq!(backoff.advance(), MIN_DELAY);
    }
}
