//! Shared sample-tick clock published by the realtime thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running tick stamp of the engine, in samples since start.
///
/// Only the realtime thread advances the clock; any thread may read it.
#[derive(Debug, Clone, Default)]
pub struct TickClock {
    ticks: Arc<AtomicU64>,
}

impl TickClock {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Advances the clock by `frames` and returns the new stamp.
    #[inline]
    pub fn advance(&self, frames: u64) -> u64 {
        let next = self.now().saturating_add(frames);
        self.ticks.store(next, Ordering::Release);
        next
    }

    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_the_same_stamp() {
        let clock = TickClock::new();
        let observer = clock.clone();
        assert_eq!(clock.advance(128), 128);
        assert_eq!(clock.advance(128), 256);
        assert_eq!(observer.now(), 256);
        observer.reset();
        assert_eq!(clock.now(), 0);
    }
}
