//! Segment buffer: the writes of one handler segment, pending commit
//!
//! TigerStyle: Read-your-writes, limits checked at write time, atomic apply.
//!
//! A segment's writes stay here until the segment reaches a commit boundary.
//! `apply` validates the stable batch, writes it as one unit, and only then
//! applies the volatile ops. `discard` is the rollback.

use crate::stable::{validate_key, StableBatch, StableStore};
use crate::volatile::{VolatileOps, VolatileStore};
use bytes::Bytes;
use selkie_core::constants::STABLE_KEY_RESERVED_PREFIX;
use selkie_core::{Error, Result};

/// Keys touched by an applied segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedSegment {
    pub stable_keys: Vec<String>,
    pub volatile_keys: Vec<String>,
}

/// Buffered writes of the running segment
#[derive(Debug, Default)]
pub struct SegmentBuffer {
    stable: StableBatch,
    volatile: VolatileOps,
}

impl SegmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.stable.is_empty() && self.volatile.is_empty()
    }

    pub fn stable_write_count(&self) -> usize {
        self.stable.len()
    }

    pub fn volatile_op_count(&self) -> usize {
        self.volatile.len()
    }

    // =========================================================================
    // Stable
    // =========================================================================

    /// Read a stable key, seeing this segment's own writes first
    pub fn stable_read(&self, store: &dyn StableStore, key: &str) -> Result<Option<Bytes>> {
        if let Some(buffered) = self.stable.get(key) {
            return Ok(Some(buffered.clone()));
        }
        store.read(key)
    }

    /// Buffer a stable write
    ///
    /// # Errors
    /// `InvalidKey` for an empty, oversized or reserved key, and
    /// `StableWriteFailure` if the segment's writes would no longer fit. A
    /// failed write is not buffered.
    pub fn stable_write(&mut self, store: &dyn StableStore, key: &str, value: Bytes) -> Result<()> {
        validate_handler_key(key)?;

        let previous = self.stable.insert(key.to_string(), value);
        if let Err(err) = store.check_batch(&self.stable) {
            match previous {
                Some(old) => self.stable.insert(key.to_string(), old),
                None => self.stable.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    // =========================================================================
    // Volatile
    // =========================================================================

    pub fn volatile_get(&self, store: &VolatileStore, key: &str) -> Option<Bytes> {
        match self.volatile.get(key) {
            Some(op) => op.clone(),
            None => store.get(key),
        }
    }

    /// Buffer a volatile put
    ///
    /// # Errors
    /// `OutOfMemory` if the segment's ops would push the store past its ceiling.
    pub fn volatile_put(&mut self, store: &VolatileStore, key: &str, value: Bytes) -> Result<()> {
        self.stage_volatile(store, key, Some(value))
    }

    /// Buffer a volatile remove
    pub fn volatile_remove(&mut self, store: &VolatileStore, key: &str) -> Result<()> {
        self.stage_volatile(store, key, None)
    }

    fn stage_volatile(
        &mut self,
        store: &VolatileStore,
        key: &str,
        op: Option<Bytes>,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_key(key, "must not be empty"));
        }
        let previous = self.volatile.insert(key.to_string(), op);
        if let Err(err) = store.check(&self.volatile) {
            match previous {
                Some(old) => self.volatile.insert(key.to_string(), old),
                None => self.volatile.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    // =========================================================================
    // Boundary
    // =========================================================================

    /// Apply the segment to the stores
    ///
    /// Stable writes land first as one batch; if they fail nothing changes.
    pub fn apply(
        self,
        stable: &dyn StableStore,
        volatile: &mut VolatileStore,
    ) -> Result<AppliedSegment> {
        if !self.stable.is_empty() {
            stable.write_batch(&self.stable)?;
        }
        // Re-checked against the ceiling; cannot fail after the per-op checks
        // unless the store changed underneath the segment.
        volatile.apply(&self.volatile)?;

        Ok(AppliedSegment {
            stable_keys: self.stable.into_keys().collect(),
            volatile_keys: self.volatile.into_keys().collect(),
        })
    }

    /// Drop every buffered write
    pub fn discard(self) -> usize {
        self.stable.len() + self.volatile.len()
    }
}

/// Stable key rules for handler code: shape checks plus the reserved prefix
pub fn validate_handler_key(key: &str) -> Result<()> {
    validate_key(key)?;
    if key.starts_with(STABLE_KEY_RESERVED_PREFIX) {
        return Err(Error::invalid_key(
            key,
            format!("prefix {} is reserved", STABLE_KEY_RESERVED_PREFIX),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stable::MemoryStableStore;

    #[test]
    fn test_read_your_writes() {
        let stable = MemoryStableStore::default();
        let volatile = VolatileStore::new(1024);
        stable.write("balance", Bytes::from("100")).unwrap();

        let mut segment = SegmentBuffer::new();
        assert_eq!(
            segment.stable_read(&stable, "balance").unwrap(),
            Some(Bytes::from("100"))
        );
        segment
            .stable_write(&stable, "balance", Bytes::from("40"))
            .unwrap();
        assert_eq!(
            segment.stable_read(&stable, "balance").unwrap(),
            Some(Bytes::from("40"))
        );
        // Store is untouched until apply
        assert_eq!(stable.read("balance").unwrap(), Some(Bytes::from("100")));

        segment
            .volatile_put(&volatile, "seen", Bytes::from("1"))
            .unwrap();
        assert_eq!(
            segment.volatile_get(&volatile, "seen"),
            Some(Bytes::from("1"))
        );
        assert!(volatile.get("seen").is_none());
    }

    #[test]
    fn test_apply_then_discard() {
        let stable = MemoryStableStore::default();
        let mut volatile = VolatileStore::new(1024);

        let mut first = SegmentBuffer::new();
        first.stable_write(&stable, "a", Bytes::from("1")).unwrap();
        first.volatile_put(&volatile, "v", Bytes::from("x")).unwrap();
        let applied = first.apply(&stable, &mut volatile).unwrap();
        assert_eq!(applied.stable_keys, vec!["a".to_string()]);
        assert_eq!(applied.volatile_keys, vec!["v".to_string()]);

        let mut second = SegmentBuffer::new();
        second.stable_write(&stable, "a", Bytes::from("2")).unwrap();
        second.volatile_remove(&volatile, "v").unwrap();
        assert_eq!(second.discard(), 2);

        assert_eq!(stable.read("a").unwrap(), Some(Bytes::from("1")));
        assert_eq!(volatile.get("v"), Some(Bytes::from("x")));
    }

    #[test]
    fn test_reserved_prefix_rejected() {
        let stable = MemoryStableStore::default();
        let mut segment = SegmentBuffer::new();
        let result = segment.stable_write(&stable, "__selkie/epoch", Bytes::from("9"));
        assert!(matches!(result, Err(Error::InvalidKey { .. })));
        assert!(segment.is_empty());
    }

    #[test]
    fn test_failed_write_is_not_buffered() {
        let stable = MemoryStableStore::new(32, 32);
        let volatile = VolatileStore::new(8);
        let mut segment = SegmentBuffer::new();

        segment.stable_write(&stable, "k", Bytes::from("small")).unwrap();
        let result = segment.stable_write(&stable, "k", Bytes::from(vec![0u8; 64]));
        assert!(matches!(result, Err(Error::StableWriteFailure { .. })));
        assert_eq!(
            segment.stable_read(&stable, "k").unwrap(),
            Some(Bytes::from("small"))
        );

        let result = segment.volatile_put(&volatile, "big", Bytes::from(vec![0u8; 16]));
        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
        assert_eq!(segment.volatile_op_count(), 0);
    }
}
