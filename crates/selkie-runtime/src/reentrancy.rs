//! Advisory reentrancy locks keyed by resource tag
//!
//! While a handler is suspended, other inbound messages still run. Handlers
//! that must not interleave on a resource take a lock on its tag. Nothing is
//! locked automatically.
//!
//! Locks live in volatile memory: they are released when the owning handler
//! completes or fails, and they do not survive a restart.

use selkie_core::constants::RESOURCE_TAG_LENGTH_BYTES_MAX;
use selkie_core::{Error, MessageId, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Table of held locks: tag -> message whose handler holds it
#[derive(Debug, Default)]
pub struct LockTable {
    locks: BTreeMap<String, MessageId>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `tag` for `holder`
    ///
    /// Re-acquiring a tag the holder already owns succeeds.
    ///
    /// # Errors
    /// `ResourceLocked` if another message holds the tag, `InvalidArgument`
    /// for an empty or oversized tag.
    pub fn acquire(&mut self, tag: &str, holder: MessageId) -> Result<()> {
        if tag.is_empty() || tag.len() > RESOURCE_TAG_LENGTH_BYTES_MAX {
            return Err(Error::invalid_argument(format!(
                "resource tag length {} must be in 1..={}",
                tag.len(),
                RESOURCE_TAG_LENGTH_BYTES_MAX
            )));
        }

        match self.locks.get(tag) {
            Some(current) if *current == holder => Ok(()),
            Some(current) => Err(Error::ResourceLocked {
                tag: tag.to_string(),
                holder: current.0,
            }),
            None => {
                self.locks.insert(tag.to_string(), holder);
                debug!(tag, holder = %holder, "Lock acquired");
                Ok(())
            }
        }
    }

    /// Release `tag` if `holder` owns it
    pub fn release(&mut self, tag: &str, holder: MessageId) -> bool {
        if self.locks.get(tag) == Some(&holder) {
            self.locks.remove(tag);
            debug!(tag, holder = %holder, "Lock released");
            true
        } else {
            false
        }
    }

    /// Release every lock `holder` owns, returning how many were held
    pub fn release_all(&mut self, holder: MessageId) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, h| *h != holder);
        before - self.locks.len()
    }

    pub fn holder(&self, tag: &str) -> Option<MessageId> {
        self.locks.get(tag).copied()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
