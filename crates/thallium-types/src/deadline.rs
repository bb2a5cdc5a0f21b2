//! Absolute deadlines for the `wait_until` family of blocking calls (spec §5,
//! §4.8).

use std::time::{Duration, Instant};

/// An absolute point in time a blocking wait should give up at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self(instant)
    }

    #[must_use]
    pub fn has_passed(self) -> bool {
        Instant::now() >= self.0
    }

    #[must_use]
    pub fn remaining(self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub const fn into_instant(self) -> Instant {
        self.0
    }
}
