//! Deterministic RNG for simulation
//!
//! TigerStyle: ChaCha20-based RNG for reproducibility.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use selkie_core::EntropySource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Deterministic random number generator
///
/// Given the same seed, produces the same sequence of values. Clones share
/// the stream; `fork` derives an independent one.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    /// The original seed (for logging/reproduction)
    seed: u64,
    rng: Arc<Mutex<ChaCha20Rng>>,
    fork_counter: Arc<AtomicU64>,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            fork_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Seed from `DST_SEED`, or a random seed
    ///
    /// Always logs the seed for reproducibility.
    pub fn from_env_or_random() -> Self {
        let seed = std::env::var("DST_SEED")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(rand::random);

        tracing::info!(seed = seed, "DST seed (set DST_SEED={} to replay)", seed);

        Self::new(seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    // A panic while holding the lock cannot leave the generator half-updated.
    fn lock(&self) -> MutexGuard<'_, ChaCha20Rng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn next_u64(&self) -> u64 {
        self.lock().gen()
    }

    /// Random f64 in [0, 1)
    pub fn next_f64(&self) -> f64 {
        self.lock().gen()
    }

    /// Random bool, true with `probability`
    pub fn next_bool(&self, probability: f64) -> bool {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1]"
        );
        self.next_f64() < probability
    }

    /// Random value in [min, max)
    pub fn next_range(&self, min: u64, max: u64) -> u64 {
        debug_assert!(min < max, "min must be less than max");
        min + (self.next_u64() % (max - min))
    }

    pub fn next_index(&self, len: usize) -> usize {
        debug_assert!(len > 0, "length must be positive");
        (self.next_u64() as usize) % len
    }

    pub fn shuffle<T>(&self, slice: &mut [T]) {
        let mut rng = self.lock();
        for i in (1..slice.len()).rev() {
            let j = rng.gen_range(0..=i);
            slice.swap(i, j);
        }
    }

    pub fn choose<'a, T>(&self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            Some(&slice[self.next_index(slice.len())])
        }
    }

    /// Derive an independent stream, seeded deterministically from this one
    pub fn fork(&self) -> Self {
        let fork_id = self.fork_counter.fetch_add(1, Ordering::SeqCst);
        let fork_seed = self
            .seed
            .wrapping_add(fork_id)
            .wrapping_mul(0x9E3779B97F4A7C15);

        Self::new(fork_seed)
    }

    pub fn fill_bytes(&self, dest: &mut [u8]) {
        self.lock().fill(dest);
    }

    /// 32-byte seed for an actor PRNG
    pub fn actor_seed(&self) -> [u8; 32] {
        let mut seed = [0u8; 32];
        self.fill_bytes(&mut seed);
        seed
    }
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl EntropySource for DeterministicRng {
    fn fill_entropy(&self, dest: &mut [u8]) {
        self.fill_bytes(dest);
    }
}
