//! Playback clocks.
//!
//! Players read elapsed time through [`Clock`] so that tests can drive a
//! timeline deterministically with [`ManualClock`], while real runs use a
//! monotonic [`PlaybackClock`] shared between arms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Source of elapsed playback time.
pub trait Clock: Send + Sync {
    /// Time since playback started.
    fn elapsed(&self) -> Duration;
}

/// Monotonic clock anchored at a single origin.
///
/// Copies share the origin, so two arms driven from copies of the same clock
/// agree on elapsed time.
#[derive(Clone, Copy, Debug)]
pub struct PlaybackClock {
    origin: Instant,
}

impl PlaybackClock {
    /// Start a clock at the current instant.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn starting_at(origin: Instant) -> Self {
        Self { origin }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }
}

impl Clock for PlaybackClock {
    fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.origin)
    }
}

/// Clock that only moves when told to.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, elapsed: Duration) {
        self.nanos.store(elapsed.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn elapsed(&self) -> Duration {
        (**self).elapsed()
    }
}
