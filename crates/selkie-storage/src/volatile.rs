//! Volatile store: heap memory wiped on restart
//!
//! TigerStyle: Bounded by an explicit ceiling, usage tracked on every mutation.

use bytes::Bytes;
use selkie_core::constants::VOLATILE_MEMORY_BYTES_MAX;
use selkie_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Buffered volatile mutation: `Some` for put, `None` for remove
pub type VolatileOps = BTreeMap<String, Option<Bytes>>;

/// In-memory key/value map bounded by a byte ceiling
///
/// Each entry costs `key.len() + value.len()` bytes.
#[derive(Debug, Clone)]
pub struct VolatileStore {
    data: HashMap<String, Bytes>,
    used_bytes: usize,
    ceiling_bytes: usize,
}

impl VolatileStore {
    pub fn new(ceiling_bytes: usize) -> Self {
        assert!(ceiling_bytes > 0, "ceiling must be positive");
        assert!(
            ceiling_bytes <= VOLATILE_MEMORY_BYTES_MAX,
            "ceiling {} exceeds limit {}",
            ceiling_bytes,
            VOLATILE_MEMORY_BYTES_MAX
        );
        Self {
            data: HashMap::new(),
            used_bytes: 0,
            ceiling_bytes,
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.data.get(key).cloned()
    }

    /// Insert or replace a key
    ///
    /// # Errors
    /// Returns `OutOfMemory` if the write would exceed the ceiling; the store
    /// is left unchanged.
    pub fn put(&mut self, key: &str, value: Bytes) -> Result<()> {
        let mut ops = VolatileOps::new();
        ops.insert(key.to_string(), Some(value));
        self.apply(&ops)
    }

    /// Remove a key, returning its previous value
    pub fn remove(&mut self, key: &str) -> Option<Bytes> {
        let old = self.data.remove(key)?;
        self.used_bytes -= key.len() + old.len();
        Some(old)
    }

    /// Usage after `ops` would be applied
    pub fn projected_usage(&self, ops: &VolatileOps) -> usize {
        ops.iter().fold(self.used_bytes, |used, (key, op)| {
            let old = self.data.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let new = op.as_ref().map(|v| key.len() + v.len()).unwrap_or(0);
            used - old + new
        })
    }

    /// Check that `ops` fit under the ceiling
    pub fn check(&self, ops: &VolatileOps) -> Result<()> {
        let projected = self.projected_usage(ops);
        if projected > self.ceiling_bytes {
            return Err(Error::OutOfMemory {
                requested: projected - self.used_bytes.min(projected),
                used: self.used_bytes,
                ceiling: self.ceiling_bytes,
            });
        }
        Ok(())
    }

    /// Apply all of `ops` or none of them
    pub fn apply(&mut self, ops: &VolatileOps) -> Result<()> {
        self.check(ops)?;
        for (key, op) in ops {
            match op {
                Some(value) => {
                    if let Some(old) = self.data.insert(key.clone(), value.clone()) {
                        self.used_bytes -= key.len() + old.len();
                    }
                    self.used_bytes += key.len() + value.len();
                }
                None => {
                    self.remove(key);
                }
            }
        }

        // Postcondition
        assert!(
            self.used_bytes <= self.ceiling_bytes,
            "VIOLATION: volatile usage {} exceeds ceiling {}",
            self.used_bytes,
            self.ceiling_bytes
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn ceiling_bytes(&self) -> usize {
        self.ceiling_bytes
    }

    /// Sorted copy of all entries
    pub fn entries(&self) -> BTreeMap<String, Bytes> {
        self.data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
