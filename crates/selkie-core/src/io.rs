//! I/O abstraction layer for deterministic simulation testing
//!
//! TigerStyle: All non-deterministic inputs go through abstraction traits.
//!
//! The engine reads two things from the outside world: the current time
//! (for segment timing and commit log timestamps) and entropy (for seeding
//! the PRNG). Production wires in the wall clock and the OS entropy source;
//! `selkie-dst` swaps in `SimClock` and `DeterministicRng`.
//!
//! ```text
//!            Dispatcher / PrngManager (same code)
//!                         │
//!           TimeProvider, EntropySource
//!                         │
//!           ┌─────────────┴─────────────┐
//!     ┌─────▼─────┐               ┌─────▼─────┐
//!     │ Production│               │    DST    │
//!     │ WallClock │               │ SimClock  │
//!     │ OsEntropy │               │ DetRng    │
//!     └───────────┘               └───────────┘
//! ```

use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Provider
// ============================================================================

/// Time provider abstraction for DST
///
/// Engine code never calls `SystemTime::now()` directly.
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Monotonic timestamp for measuring durations
    fn monotonic_ms(&self) -> u64 {
        self.now_ms()
    }
}

/// Production time provider using wall clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

// ============================================================================
// Entropy Source
// ============================================================================

/// Source of seed material for the PRNG
///
/// # Implementations
///
/// - `OsEntropy`: Production - operating system randomness
/// - `DeterministicRng` (in selkie-dst): DST - seeded, reproducible
pub trait EntropySource: Send + Sync + std::fmt::Debug {
    /// Fill `dest` with seed material
    fn fill_entropy(&self, dest: &mut [u8]);
}

/// Production entropy source backed by the OS
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill_entropy(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

// ============================================================================
// I/O Context
// ============================================================================

/// Bundle of all I/O providers
#[derive(Clone)]
pub struct IoContext {
    pub time: Arc<dyn TimeProvider>,
    pub entropy: Arc<dyn EntropySource>,
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("time", &self.time)
            .field("entropy", &self.entropy)
            .finish()
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::production()
    }
}

impl IoContext {
    /// Production I/O context with wall clock and OS entropy
    pub fn production() -> Self {
        Self {
            time: Arc::new(WallClockTime::new()),
            entropy: Arc::new(OsEntropy),
        }
    }

    /// I/O context with custom providers
    pub fn new(time: Arc<dyn TimeProvider>, entropy: Arc<dyn EntropySource>) -> Self {
        Self { time, entropy }
    }

    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }
}
