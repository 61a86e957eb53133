//! PRNG manager: the actor's seeded random generator
//!
//! TigerStyle: Explicit seeding lifecycle, no process-wide generator.
//!
//! The generator lives in volatile memory. It must be seeded by `on_init`
//! when the actor is created and again by `on_restart` after every restart;
//! a restarted engine starts unseeded. Drawing from an unseeded generator is
//! a caller error that is reported and counted.

use bytes::Bytes;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use selkie_core::constants::{PRNG_REQUEST_BYTES_MAX, PRNG_SEED_BYTES};
use selkie_core::{EntropySource, Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Seed for the actor's generator
pub type PrngSeed = [u8; PRNG_SEED_BYTES];

#[derive(Debug, Clone)]
struct PrngState {
    seed: PrngSeed,
    /// Bytes drawn since seeding
    counter: u64,
    rng: ChaCha20Rng,
}

impl PrngState {
    fn new(seed: PrngSeed) -> Self {
        Self {
            seed,
            counter: 0,
            rng: ChaCha20Rng::from_seed(seed),
        }
    }
}

/// Saved generator position, restored when a segment rolls back
#[derive(Debug, Clone)]
pub struct PrngCheckpoint(Option<PrngState>);

/// Owns the actor's generator and its seeding lifecycle
#[derive(Debug)]
pub struct PrngManager {
    state: Option<PrngState>,
    entropy: Arc<dyn EntropySource>,
    /// Draws attempted while unseeded
    violations: u64,
}

impl PrngManager {
    /// Create an unseeded manager
    pub fn new(entropy: Arc<dyn EntropySource>) -> Self {
        Self {
            state: None,
            entropy,
            violations: 0,
        }
    }

    /// Seed on first initialization, from `seed` or from the entropy source
    pub fn on_init(&mut self, seed: Option<PrngSeed>) {
        let explicit = seed.is_some();
        let seed = seed.unwrap_or_else(|| self.draw_seed());
        self.state = Some(PrngState::new(seed));
        info!(explicit_seed = explicit, "PRNG seeded on init");
    }

    /// Reseed after a restart, mixing the restart epoch into fresh entropy
    pub fn on_restart(&mut self, epoch: u64) {
        let mut seed = self.draw_seed();
        for (byte, mix) in seed.iter_mut().zip(epoch.to_le_bytes()) {
            *byte ^= mix;
        }
        self.state = Some(PrngState::new(seed));
        info!(epoch, "PRNG reseeded after restart");
    }

    fn draw_seed(&self) -> PrngSeed {
        let mut seed = [0u8; PRNG_SEED_BYTES];
        self.entropy.fill_entropy(&mut seed);
        seed
    }

    /// Draw `n_bytes` random bytes
    ///
    /// Synchronous; never suspends.
    ///
    /// # Errors
    /// `PrngUnseeded` before seeding, `InvalidArgument` above `PRNG_REQUEST_BYTES_MAX`.
    pub fn next(&mut self, n_bytes: usize) -> Result<Bytes> {
        if n_bytes > PRNG_REQUEST_BYTES_MAX {
            return Err(Error::invalid_argument(format!(
                "requested {} random bytes, limit {}",
                n_bytes, PRNG_REQUEST_BYTES_MAX
            )));
        }

        let Some(state) = self.state.as_mut() else {
            self.violations += 1;
            warn!(
                violations = self.violations,
                "PRNG used before seeding"
            );
            return Err(Error::PrngUnseeded);
        };

        let mut out = vec![0u8; n_bytes];
        state.rng.fill_bytes(&mut out);
        state.counter += n_bytes as u64;
        Ok(Bytes::from(out))
    }

    pub fn is_seeded(&self) -> bool {
        self.state.is_some()
    }

    pub fn seed(&self) -> Option<PrngSeed> {
        self.state.as_ref().map(|s| s.seed)
    }

    /// Bytes drawn since the last seeding
    pub fn counter(&self) -> u64 {
        self.state.as_ref().map(|s| s.counter).unwrap_or(0)
    }

    /// Number of draws attempted while unseeded
    pub fn violations(&self) -> u64 {
        self.violations
    }

    pub fn checkpoint(&self) -> PrngCheckpoint {
        PrngCheckpoint(self.state.clone())
    }

    /// Rewind to `checkpoint`; the violation count is kept
    pub fn rollback_to(&mut self, checkpoint: PrngCheckpoint) {
        self.state = checkpoint.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selkie_core::OsEntropy;

    /// Entropy source that always yields the same byte
    #[derive(Debug)]
    struct FixedEntropy(u8);

    impl EntropySource for FixedEntropy {
        fn fill_entropy(&self, dest: &mut [u8]) {
            dest.fill(self.0);
        }
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = PrngManager::new(Arc::new(OsEntropy));
        let mut b = PrngManager::new(Arc::new(OsEntropy));
        a.on_init(Some([7u8; 32]));
        b.on_init(Some([7u8; 32]));
        assert_eq!(a.next(64).unwrap(), b.next(64).unwrap());
        assert_eq!(a.counter(), 64);
    }

    #[test]
    fn test_different_seeds_differ() {
        let mut a = PrngManager::new(Arc::new(OsEntropy));
        let mut b = PrngManager::new(Arc::new(OsEntropy));
        a.on_init(Some([1u8; 32]));
        b.on_init(Some([2u8; 32]));
        assert_ne!(a.next(32).unwrap(), b.next(32).unwrap());
    }

    #[test]
    fn test_unseeded_is_flagged() {
        let mut prng = PrngManager::new(Arc::new(OsEntropy));
        assert!(matches!(prng.next(8), Err(Error::PrngUnseeded)));
        assert!(matches!(prng.next(8), Err(Error::PrngUnseeded)));
        assert_eq!(prng.violations(), 2);
        assert!(!prng.is_seeded());
    }

    #[test]
    fn test_restart_mixes_epoch() {
        let mut a = PrngManager::new(Arc::new(FixedEntropy(9)));
        let mut b = PrngManager::new(Arc::new(FixedEntropy(9)));
        a.on_restart(1);
        b.on_restart(2);
        assert_ne!(a.seed(), b.seed());

        let mut c = PrngManager::new(Arc::new(FixedEntropy(9)));
        c.on_restart(1);
        assert_eq!(a.next(16).unwrap(), c.next(16).unwrap());
    }

    #[test]
    fn test_rollback_rewinds_stream() {
        let mut prng = PrngManager::new(Arc::new(OsEntropy));
        prng.on_init(Some([3u8; 32]));
        let checkpoint = prng.checkpoint();
        let first = prng.next(16).unwrap();
        prng.rollback_to(checkpoint);
        assert_eq!(prng.next(16).unwrap(), first);
    }

    #[test]
    fn test_oversized_request_rejected() {
        let mut prng = PrngManager::new(Arc::new(OsEntropy));
        prng.on_init(None);
        assert!(matches!(
            prng.next(PRNG_REQUEST_BYTES_MAX + 1),
            Err(Error::InvalidArgument { .. })
        ));
    }
}
