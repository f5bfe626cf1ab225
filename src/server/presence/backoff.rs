use std::time::Duration;

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Exponential reconnect delay: 1s doubling per failed attempt, capped at 30s.
#[derive(Debug, Default, Clone)]
pub(crate) struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = INITIAL_DELAY
            .checked_mul(2_u32.saturating_pow(self.attempt))
            .map_or(MAX_DELAY, |d| d.min(MAX_DELAY));
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps() {
        let mut backoff = Backoff::new();
        let delays = (0..8).map(|_| backoff.next_delay().as_millis()).collect::<Vec<_>>();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new();
        for _ in 0..40 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), MAX_DELAY);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), INITIAL_DELAY);
    }
}
