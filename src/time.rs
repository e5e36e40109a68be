//! Time source abstraction.
//!
//! Everything that compares deadlines reads the current instant through [`Clock`]
//! so the host tests can drive time by hand.

use embassy_time::Instant;

/// A monotonic time source.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The `embassy-time` driver clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}
