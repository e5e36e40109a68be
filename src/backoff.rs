//! # Retry delay policy
//!
//! [`BackoffPolicy`] decides how long the session supervisor waits before the
//! next connect attempt. The delay for attempt `n` is `first × factor^n`,
//! clamped to `max`, then jittered. The base is derived from the attempt number
//! alone, so jitter never feeds back into later delays.
//!
//! ```ignore
//! let backoff = BackoffPolicy::default();
//! let delay = backoff.next(attempt, &mut rng);
//! ```

use embassy_time::Duration;
use rand::Rng;

/// Randomization applied to a backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JitterPolicy {
    /// Use the exact delay.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// `delay / 2` plus uniform in `[0, delay / 2]`.
    Equal,
}

impl JitterPolicy {
    pub fn apply<R: Rng>(self, delay: Duration, rng: &mut R) -> Duration {
        let ticks = delay.as_ticks();
        if ticks == 0 {
            return delay;
        }
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_ticks(rng.gen_range(0..=ticks)),
            JitterPolicy::Equal => {
                let half = ticks / 2;
                Duration::from_ticks(half + rng.gen_range(0..=ticks - half))
            }
        }
    }
}

/// Capped exponential retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound for every delay, jitter included.
    pub max: Duration,
    /// Multiplicative growth per attempt. `1` keeps the delay constant.
    pub factor: u32,
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// 500 ms doubling up to 5 s with equal jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(5),
            factor: 2,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// The same delay for every attempt.
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1,
            jitter: JitterPolicy::None,
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn next<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let max = self.max.as_ticks();
        let base = self
            .factor
            .checked_pow(attempt)
            .and_then(|growth| self.first.as_ticks().checked_mul(growth as u64))
            .map_or(max, |ticks| ticks.min(max));
        self.jitter.apply(Duration::from_ticks(base), rng)
    }
}
