//! Capped exponential backoff with randomized jitter for reconnect attempts.

use std::time::Duration;

pub const DEFAULT_JITTER: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    /// `max` is raised to `base` when given a smaller value.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: DEFAULT_JITTER,
        }
    }

    /// Fraction of the delay used as a symmetric random spread, clamped to `[0, 1]`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// `base * 2^retry`, saturating at `max`.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay to wait before reconnect attempt number `retry` (zero-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling(retry);
        if self.jitter == 0.0 || ceiling.is_zero() {
            return ceiling;
        }

        let spread = 1.0 + self.jitter * (2.0 * unit_random() - 1.0);
        Duration::try_from_secs_f64(ceiling.as_secs_f64() * spread)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Uniform sample in `[0, 1)`; falls back to the midpoint (no jitter) when the
/// OS entropy source is unavailable.
fn unit_random() -> f64 {
    let mut bytes = [0u8; 8];
    if getrandom::fill(&mut bytes).is_err() {
        return 0.5;
    }
    (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1)).with_jitter(0.0);
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1));
        assert_eq!(backoff.delay(63), Duration::from_secs(1));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_spread_and_cap() {
        let backoff = Backoff::new(Duration::from_millis(1000), Duration::from_secs(60)).with_jitter(0.25);
        for _ in 0..200 {
            let delay = backoff.delay(0);
            assert!(delay >= Duration::from_millis(750), "{delay:?}");
            assert!(delay <= Duration::from_millis(1250), "{delay:?}");
        }

        let capped = Backoff::new(Duration::from_secs(1), Duration::from_secs(2)).with_jitter(1.0);
        for _ in 0..200 {
            assert!(capped.delay(10) <= Duration::from_secs(2));
        }
    }

    #[test]
    fn jitter_is_clamped() {
        assert_eq!(Backoff::default().with_jitter(7.0).jitter(), 1.0);
        assert_eq!(Backoff::default().with_jitter(-1.0).jitter(), 0.0);
        assert_eq!(Backoff::default().with_jitter(f64::NAN).jitter(), 0.0);
    }

    #[test]
    fn max_never_below_base() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.max(), Duration::from_secs(5));
        assert_eq!(backoff.base(), Duration::from_secs(5));
    }
}
