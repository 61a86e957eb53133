//! Deterministic clock for simulation
//!
//! TigerStyle: Explicit time control, no system time dependencies.

use selkie_core::TimeProvider;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Simulated clock; time moves only when told to
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    current_time_ms: Arc<AtomicU64>,
}

impl SimClock {
    pub fn from_millis(ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(ms)),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }

    pub fn advance_ms(&self, ms: u64) {
        self.current_time_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the time; it must not go backwards
    pub fn set_ms(&self, ms: u64) {
        let previous = self.current_time_ms.swap(ms, Ordering::SeqCst);
        assert!(
            ms >= previous,
            "VIOLATION: simulated time moved backwards from {} to {}",
            previous,
            ms
        );
    }
}

impl TimeProvider for SimClock {
    fn now_ms(&self) -> u64 {
        SimClock::now_ms(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advance() {
        let clock = SimClock::from_millis(1000);
        clock.advance_ms(500);
        assert_eq!(clock.now_ms(), 1500);
    }

    #[test]
    fn test_clock_clones_share_time() {
        let clock = SimClock::default();
        let other = clock.clone();
        clock.advance_ms(10);
        assert_eq!(TimeProvider::monotonic_ms(&other), 10);
    }

    #[test]
    #[should_panic(expected = "VIOLATION")]
    fn test_clock_never_goes_back() {
        let clock = SimClock::from_millis(100);
        clock.set_ms(50);
    }
}
