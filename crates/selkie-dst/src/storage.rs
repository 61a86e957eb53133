//! Simulated stable store for deterministic testing
//!
//! TigerStyle: In-memory store with fault injection on every durable write.

use crate::fault::{FaultInjector, FaultType};
use bytes::Bytes;
use selkie_core::{Error, Result};
use selkie_storage::{MemoryStableStore, StableBatch, StableStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable store whose writes and grows can be made to fail
///
/// Clones share data and counters, so a clone outlives a simulated restart
/// the same way a disk would. An injected failure leaves the store untouched.
#[derive(Debug, Clone)]
pub struct SimStableStore {
    inner: MemoryStableStore,
    fault_injector: Arc<FaultInjector>,
    failed_writes: Arc<AtomicU64>,
}

impl SimStableStore {
    pub fn new(
        capacity_bytes: u64,
        capacity_bytes_max: u64,
        fault_injector: Arc<FaultInjector>,
    ) -> Self {
        Self {
            inner: MemoryStableStore::new(capacity_bytes, capacity_bytes_max),
            fault_injector,
            failed_writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Writes and grows refused by an injected fault
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::SeqCst)
    }

    fn injected(&self, operation: &str, key: &str) -> Option<Error> {
        let fault = self.fault_injector.should_inject(operation)?;
        let reason = match fault {
            FaultType::StableWriteFail => "injected write failure",
            FaultType::StableGrowFail => "injected grow failure",
            // Transport faults never target stable operations
            _ => return None,
        };
        self.failed_writes.fetch_add(1, Ordering::SeqCst);
        Some(Error::stable_write_failed(key, reason))
    }
}

impl StableStore for SimStableStore {
    fn read(&self, key: &str) -> Result<Option<Bytes>> {
        self.inner.read(key)
    }

    fn check_batch(&self, batch: &StableBatch) -> Result<()> {
        self.inner.check_batch(batch)
    }

    fn write_batch(&self, batch: &StableBatch) -> Result<()> {
        let first_key = batch.keys().next().map(String::as_str).unwrap_or_default();
        if let Some(err) = self.injected("stable_write", first_key) {
            return Err(err);
        }
        self.inner.write_batch(batch)
    }

    fn grow(&self, additional_bytes: u64) -> Result<u64> {
        if let Some(err) = self.injected("stable_grow", "") {
            return Err(err);
        }
        self.inner.grow(additional_bytes)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys()
    }

    fn entries(&self) -> Result<StableBatch> {
        self.inner.entries()
    }

    fn capacity_bytes(&self) -> u64 {
        self.inner.capacity_bytes()
    }

    fn allocated_bytes(&self) -> u64 {
        self.inner.allocated_bytes()
    }
}
