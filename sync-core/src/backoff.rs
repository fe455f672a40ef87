//! Exponential retry backoff with jitter.
//!
//! Used by sync-client to space out retries of a failed remote store call.
//! Jitter keeps several servers that lost the store at the same moment from
//! retrying in lockstep.

use std::time::Duration;

/// Cap on the exponential delay, as a multiple of the base delay.
pub const MAX_MULTIPLIER: u64 = 16;

/// Exponential backoff calculator with jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff starting at `base`, capped at `MAX_MULTIPLIER × base`.
    pub fn new(base: Duration) -> Self {
        let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
        Self {
            base_ms,
            max_ms: base_ms.saturating_mul(MAX_MULTIPLIER),
            attempt: 0,
        }
    }

    /// Get the next delay and advance the attempt counter.
    ///
    /// Formula: `min(max, base × 2^attempt) + random(0..=capped/4)`
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .base_ms
            .saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX));
        let capped = exp.min(self.max_ms);
        let jitter = random_below(capped / 4 + 1);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(capped + jitter)
    }

    /// Number of delays handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset after a successful call.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Uniform-ish random value in `0..bound`.
///
/// Falls back to zero jitter if the OS random source is unavailable; a retry
/// without jitter is still a retry.
fn random_below(bound: u64) -> u64 {
    if bound == 0 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) % bound,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_increases() {
        let mut backoff = Backoff::new(Duration::from_millis(100));

        let d1 = backoff.next_delay();
        let d2 = backoff.next_delay();
        let d3 = backoff.next_delay();

        assert!(d1.as_millis() >= 100);
        assert!(d2.as_millis() >= 200);
        assert!(d3.as_millis() >= 400);
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn backoff_caps_at_max() {
        let mut backoff = Backoff::new(Duration::from_millis(100));

        for _ in 0..70 {
            let delay = backoff.next_delay();
            // Cap is 1600ms, plus at most a quarter of that as jitter.
            assert!(delay.as_millis() <= 2000, "got {:?}", delay);
        }
    }

    #[test]
    fn backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100));
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();

        let d = backoff.next_delay();
        assert!(d.as_millis() < 200);
    }

    #[test]
    fn jitter_creates_variance() {
        let delays: Vec<Duration> = (0..20)
            .map(|_| {
                let mut b = Backoff::new(Duration::from_millis(1000));
                b.next_delay()
            })
            .collect();

        let min = delays.iter().min().unwrap();
        let max = delays.iter().max().unwrap();
        assert!(
            max > min,
            "Expected jitter variance, got min={:?} max={:?}",
            min,
            max
        );
    }

    #[test]
    fn zero_base_never_waits() {
        let mut backoff = Backoff::new(Duration::ZERO);
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), Duration::ZERO);
        }
    }
}
