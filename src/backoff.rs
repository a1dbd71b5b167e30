// Exponential reconnect backoff for the metadata channel.

/// Doubling delay, capped, reset after the stream recovers.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: f64,
    max_ms: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial_ms: f64, max_ms: f64) -> Self {
        Backoff {
            initial_ms,
            max_ms: max_ms.max(initial_ms),
            attempt: 0,
        }
    }

    /// Delay before the next reconnect attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> f64 {
        let factor = 2f64.powi(self.attempt.min(30) as i32);
        self.attempt = self.attempt.saturating_add(1);
        (self.initial_ms * factor).min(self.max_ms)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let mut backoff = Backoff::new(500.0, 3_000.0);
        let delays: Vec<f64> = (0..5).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, vec![500.0, 1_000.0, 2_000.0, 3_000.0, 3_000.0]);
        assert_eq!(backoff.attempt(), 5);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(100.0, 1_000.0);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), 100.0);
    }
}
