//! State snapshots taken at commit boundaries
//!
//! A snapshot reflects every completed segment up to the commit it names and
//! nothing from a segment that is still running, because running segments
//! only write to their `SegmentBuffer`.

use crate::stable::StableStore;
use crate::volatile::VolatileStore;
use bytes::Bytes;
use selkie_core::constants::STABLE_KEY_RESERVED_PREFIX;
use selkie_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Committed contents of both stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Handler-visible stable contents (reserved engine keys excluded)
    pub stable: BTreeMap<String, Bytes>,
    pub volatile: BTreeMap<String, Bytes>,
    /// Commit log sequence the snapshot is consistent with
    pub commit_sequence: u64,
    pub stable_capacity_bytes: u64,
    pub stable_allocated_bytes: u64,
    pub volatile_used_bytes: usize,
}

impl StateSnapshot {
    pub fn capture(
        stable: &dyn StableStore,
        volatile: &VolatileStore,
        commit_sequence: u64,
    ) -> Result<Self> {
        let stable_entries = stable
            .entries()?
            .into_iter()
            .filter(|(key, _)| !key.starts_with(STABLE_KEY_RESERVED_PREFIX))
            .collect();

        Ok(Self {
            stable: stable_entries,
            volatile: volatile.entries(),
            commit_sequence,
            stable_capacity_bytes: stable.capacity_bytes(),
            stable_allocated_bytes: stable.allocated_bytes(),
            volatile_used_bytes: volatile.used_bytes(),
        })
    }

    pub fn stable_get(&self, key: &str) -> Option<&Bytes> {
        self.stable.get(key)
    }

    pub fn volatile_get(&self, key: &str) -> Option<&Bytes> {
        self.volatile.get(key)
    }
}
